pub mod buffer;
pub mod catalog;
pub mod file;
pub mod record;
pub mod transaction;

pub use buffer::{
    BufferError, BufferPool, BufferResult, DbFile, LockManager, Page, PageKey, Permission,
    PoolConfig, TableId,
};
pub use catalog::{Catalog, CatalogError, CatalogResult, TableMetadata};
pub use file::{FileError, FileResult, PAGE_SIZE, PageNo, PagedFile};
pub use record::{HeapFile, RecordError, RecordId, RecordResult, SlotId, SlotPage};
pub use transaction::{TransactionId, TransactionRegistry};
