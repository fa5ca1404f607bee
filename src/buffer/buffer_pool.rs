use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::config::PoolConfig;
use super::db_file::DbFile;
use super::error::{BufferError, BufferResult};
use super::lock_manager::{LockManager, Permission};
use super::page::{Page, PageKey, TableId};
use crate::catalog::Catalog;
use crate::record::RecordId;
use crate::transaction::{TransactionId, TransactionRegistry};

type PageCache = LruCache<PageKey, Page>;

/// Bounded page cache shared by all transactions.
///
/// Every access goes through the lock manager first. Dirty pages stay in
/// memory until their transaction commits (no-steal), so eviction only ever
/// picks clean pages.
pub struct BufferPool {
    config: PoolConfig,
    catalog: Arc<Catalog>,
    /// Combined page map and recency order, most recently used first.
    /// Unbounded on purpose: capacity is enforced by `evict`, which has to
    /// be able to skip dirty pages.
    pages: Mutex<PageCache>,
    lock_manager: LockManager,
    registry: TransactionRegistry,
}

impl BufferPool {
    pub fn new(config: PoolConfig, catalog: Arc<Catalog>) -> BufferResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            pages: Mutex::new(LruCache::unbounded()),
            lock_manager: LockManager::new(),
            registry: TransactionRegistry::new(),
        })
    }

    /// Create a buffer pool with default timeouts and the given capacity
    pub fn with_capacity(capacity: usize, catalog: Arc<Catalog>) -> BufferResult<Self> {
        Self::new(PoolConfig::with_capacity(capacity), catalog)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Get a page for `txn` with the given permission, loading it on a miss.
    ///
    /// Blocks while another transaction holds a conflicting lock. Once the
    /// transaction has been running longer than the abort timeout, a denied
    /// request fails with [`BufferError::TransactionAborted`] and the caller
    /// must call [`abort`](Self::abort).
    ///
    /// The returned page is a copy; changes become visible to the pool only
    /// through [`mark_mutated`](Self::mark_mutated).
    pub fn fetch(
        &self,
        txn: TransactionId,
        key: PageKey,
        permission: Permission,
    ) -> BufferResult<Page> {
        let started = self.registry.register(txn);
        self.wait_for_lock(txn, key, permission, started)?;

        let mut pages = self.pages.lock();
        if let Some(page) = pages.get(&key) {
            trace!(page = %key, %txn, "cache hit");
            return Ok(page.clone());
        }

        let file = self.table_file(key.table_id)?;
        if pages.len() >= self.config.capacity {
            self.evict(&mut pages)?;
        }

        let page = file.read_page(key.page_no)?;
        debug!(page = %key, %txn, "loaded page");
        pages.put(key, page.clone());
        Ok(page)
    }

    fn wait_for_lock(
        &self,
        txn: TransactionId,
        key: PageKey,
        permission: Permission,
        started: Instant,
    ) -> BufferResult<()> {
        while !self.lock_manager.acquire(key, txn, permission) {
            let waited = started.elapsed();
            if waited > self.config.abort_timeout {
                warn!(
                    page = %key,
                    %txn,
                    ?permission,
                    waited_ms = waited.as_millis() as u64,
                    "lock wait exceeded abort timeout"
                );
                return Err(BufferError::TransactionAborted(txn));
            }
            self.lock_manager.wait_for_release(self.config.poll_interval);
        }
        Ok(())
    }

    /// Record `page` as modified by `txn` and make it the most recently used.
    ///
    /// The page need not be cached yet (a tuple insert may have allocated it).
    /// A cached copy keeps its own before-image; only the content changes.
    ///
    /// `txn` must hold an exclusive lock on the page, otherwise this fails
    /// with [`BufferError::NotLocked`] and the cache is left untouched.
    pub fn mark_mutated(&self, txn: TransactionId, mut page: Page) -> BufferResult<()> {
        let key = page.key();
        if self.lock_manager.mode(txn, key) != Some(Permission::Exclusive) {
            warn!(page = %key, %txn, "mutation without exclusive lock rejected");
            return Err(BufferError::NotLocked { txn, page: key });
        }
        let mut pages = self.pages.lock();

        if let Some(cached) = pages.get_mut(&key) {
            cached.data_mut().copy_from_slice(page.data());
            cached.mark_dirty(Some(txn));
        } else {
            if pages.len() >= self.config.capacity {
                self.evict(&mut pages)?;
            }
            page.mark_dirty(Some(txn));
            pages.put(key, page);
        }

        trace!(page = %key, %txn, "page marked dirty");
        Ok(())
    }

    /// Insert a tuple into a table and record every page it touched as dirty.
    /// Returns the keys of those pages.
    pub fn insert_tuple(
        &self,
        txn: TransactionId,
        table_id: TableId,
        tuple: &[u8],
    ) -> BufferResult<Vec<PageKey>> {
        let file = self.table_file(table_id)?;
        let affected = file.insert_tuple(self, txn, tuple)?;

        let keys = affected.iter().map(Page::key).collect();
        for page in affected {
            self.mark_mutated(txn, page)?;
        }
        Ok(keys)
    }

    /// Delete the tuple at `rid` and record its page as dirty
    pub fn delete_tuple(&self, txn: TransactionId, rid: RecordId) -> BufferResult<()> {
        let file = self.table_file(rid.page.table_id)?;
        let page = file.delete_tuple(self, txn, rid)?;
        self.mark_mutated(txn, page)
    }

    /// Release `txn`'s lock on one page before the transaction ends.
    ///
    /// This gives up repeatable reads on that page. Only call it for pages the
    /// transaction has not modified and does not need to read again.
    pub fn release_lock(&self, txn: TransactionId, key: PageKey) {
        self.lock_manager.release(key, txn);
    }

    pub fn holds_lock(&self, txn: TransactionId, key: PageKey) -> bool {
        self.lock_manager.holds(txn, key)
    }

    /// Finish a transaction: commit writes its dirty pages and makes them the
    /// new rollback baseline; abort restores their before-images in memory.
    /// Either way all of its locks are released afterwards.
    ///
    /// If a commit write fails the error is returned with the locks still
    /// held; the caller should abort to undo whatever was not written.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> BufferResult<()> {
        if !commit {
            self.abort(txn);
            return Ok(());
        }

        let flushed = self.flush_pages(txn)?;
        debug!(%txn, flushed, "transaction committed");
        self.lock_manager.release_all(txn);
        self.registry.remove(txn);
        Ok(())
    }

    /// Commit `txn`
    pub fn commit(&self, txn: TransactionId) -> BufferResult<()> {
        self.transaction_complete(txn, true)
    }

    /// Roll back `txn`'s cached changes and release its locks
    pub fn abort(&self, txn: TransactionId) {
        let reverted = self.revert_pages(txn);
        debug!(%txn, reverted, "transaction aborted");
        self.lock_manager.release_all(txn);
        self.registry.remove(txn);
    }

    /// Complete `txn` with the default outcome, commit
    pub fn complete(&self, txn: TransactionId) -> BufferResult<()> {
        self.commit(txn)
    }

    /// Write every page dirtied by `txn`. Returns how many were written.
    pub fn flush_pages(&self, txn: TransactionId) -> BufferResult<usize> {
        let mut pages = self.pages.lock();
        let owned: Vec<PageKey> = pages
            .iter()
            .filter(|(_, page)| page.dirty_owner() == Some(txn))
            .map(|(key, _)| *key)
            .collect();

        for key in &owned {
            self.flush_page(&mut pages, *key)?;
        }
        Ok(owned.len())
    }

    /// Write every dirty page.
    ///
    /// Meant for checkpoints and shutdown: pages of running transactions are
    /// written too and become their new rollback baseline.
    pub fn flush_all(&self) -> BufferResult<()> {
        let mut pages = self.pages.lock();
        let dirty: Vec<PageKey> = pages
            .iter()
            .filter(|(_, page)| page.is_dirty())
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            self.flush_page(&mut pages, key)?;
        }
        debug!(cached = pages.len(), "flushed all dirty pages");
        Ok(())
    }

    /// Drop a page from the cache without writing it
    pub fn discard(&self, key: PageKey) {
        if self.pages.lock().pop(&key).is_some() {
            debug!(page = %key, "discarded page");
        }
    }

    fn revert_pages(&self, txn: TransactionId) -> usize {
        let mut pages = self.pages.lock();
        let mut reverted = 0;
        for (_, page) in pages.iter_mut() {
            if page.dirty_owner() == Some(txn) {
                page.restore_before_image();
                reverted += 1;
            }
        }
        reverted
    }

    /// Write a cached page if it is dirty. Does not touch recency.
    fn flush_page(&self, pages: &mut PageCache, key: PageKey) -> BufferResult<()> {
        let Some(page) = pages.peek_mut(&key) else {
            return Ok(());
        };
        if !page.is_dirty() {
            return Ok(());
        }

        let file = self.table_file(key.table_id)?;
        file.write_page(page)?;
        page.mark_dirty(None);
        page.set_before_image();
        debug!(page = %key, "flushed page");
        Ok(())
    }

    /// Remove the least recently used clean page
    fn evict(&self, pages: &mut PageCache) -> BufferResult<PageKey> {
        let victim = pages
            .iter()
            .rev()
            .find(|(_, page)| !page.is_dirty())
            .map(|(key, _)| *key);

        let Some(key) = victim else {
            warn!(capacity = self.config.capacity, "no clean page to evict");
            return Err(BufferError::CapacityExhausted {
                capacity: self.config.capacity,
            });
        };

        self.flush_page(pages, key)?;
        pages.pop(&key);
        debug!(page = %key, "evicted page");
        Ok(key)
    }

    fn table_file(&self, table_id: TableId) -> BufferResult<Arc<dyn DbFile>> {
        self.catalog
            .file(table_id)
            .ok_or(BufferError::UnknownTable(table_id))
    }

    /// Get the number of pages currently cached
    pub fn cached_len(&self) -> usize {
        self.pages.lock().len()
    }

    /// Check if a page is cached, without touching recency
    pub fn is_cached(&self, key: PageKey) -> bool {
        self.pages.lock().contains(&key)
    }

    /// Get the number of dirty cached pages
    pub fn dirty_count(&self) -> usize {
        self.pages
            .lock()
            .iter()
            .filter(|(_, page)| page.is_dirty())
            .count()
    }

    /// Cached page keys, most recently used first
    pub fn cached_keys(&self) -> Vec<PageKey> {
        self.pages.lock().iter().map(|(key, _)| *key).collect()
    }

    /// Copy of a cached page, bypassing locks and recency. For diagnostics.
    pub fn peek_cached(&self, key: PageKey) -> Option<Page> {
        self.pages.lock().peek(&key).cloned()
    }

    /// Number of transactions that have fetched a page and not yet finished
    pub fn active_transactions(&self) -> usize {
        self.registry.len()
    }
}
