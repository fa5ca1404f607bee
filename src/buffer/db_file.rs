use super::buffer_pool::BufferPool;
use super::error::BufferResult;
use super::page::{Page, TableId};
use crate::file::{FileResult, PageNo};
use crate::record::RecordId;
use crate::transaction::TransactionId;

/// A table's backing store as seen by the buffer pool.
///
/// The pool only ever calls `read_page` and `write_page`. Tuple mutations are
/// driven by operators: they fetch pages through the pool (so locks are
/// taken), change them, and hand the affected pages back, which the pool
/// then records as dirty via [`BufferPool::mark_mutated`].
pub trait DbFile: Send + Sync {
    fn table_id(&self) -> TableId;

    fn read_page(&self, page_no: PageNo) -> FileResult<Page>;

    fn write_page(&self, page: &Page) -> FileResult<()>;

    fn num_pages(&self) -> FileResult<usize>;

    /// Add a tuple on behalf of `txn`, returning every page it modified
    /// (possibly a newly allocated one).
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &[u8],
    ) -> BufferResult<Vec<Page>>;

    /// Remove the tuple at `rid` on behalf of `txn`, returning its page
    fn delete_tuple(&self, pool: &BufferPool, txn: TransactionId, rid: RecordId)
    -> BufferResult<Page>;
}
