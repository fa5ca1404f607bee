use parking_lot::Mutex;
use std::path::Path;
use tracing::debug;

use super::error::{RecordError, RecordResult};
use super::page::SlotPage;
use super::RecordId;
use crate::buffer::{BufferPool, BufferResult, DbFile, Page, PageKey, Permission, TableId};
use crate::file::{FileResult, PAGE_SIZE, PageNo, PagedFile};
use crate::transaction::TransactionId;

/// An unordered table of fixed-size tuples stored in slotted pages
pub struct HeapFile {
    table_id: TableId,
    record_size: usize,
    file: Mutex<PagedFile>,
}

impl HeapFile {
    /// Create a new, empty table file
    pub fn create<P: AsRef<Path>>(
        path: P,
        table_id: TableId,
        record_size: usize,
    ) -> RecordResult<Self> {
        check_record_size(record_size)?;
        let file = PagedFile::create(path)?;
        Ok(Self {
            table_id,
            record_size,
            file: Mutex::new(file),
        })
    }

    /// Open an existing table file
    pub fn open<P: AsRef<Path>>(
        path: P,
        table_id: TableId,
        record_size: usize,
    ) -> RecordResult<Self> {
        check_record_size(record_size)?;
        let file = PagedFile::open(path)?;
        Ok(Self {
            table_id,
            record_size,
            file: Mutex::new(file),
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.file.lock().path().to_path_buf()
    }

    /// Flush the OS buffers of the underlying file
    pub fn sync(&self) -> FileResult<()> {
        self.file.lock().sync()
    }

    fn page_key(&self, page_no: PageNo) -> PageKey {
        PageKey::new(self.table_id, page_no)
    }

    /// Append a formatted, empty page to the file and return its number
    fn append_empty_page(&self) -> RecordResult<PageNo> {
        let mut buffer = vec![0u8; PAGE_SIZE];
        SlotPage::format(&mut buffer, self.record_size)?;
        let page_no = self.file.lock().append_page(&buffer)?;
        debug!(table = self.table_id, page_no, "allocated heap page");
        Ok(page_no)
    }

    /// Try to place `tuple` on `page`. Returns the slot used, if any.
    fn place(&self, page: &mut Page, tuple: &[u8]) -> RecordResult<Option<usize>> {
        let mut slots = SlotPage::from_buffer(page.data_mut())?;
        slots.insert(tuple)
    }

    /// Read one tuple under a shared lock
    pub fn get_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        rid: RecordId,
    ) -> BufferResult<Vec<u8>> {
        let mut page = pool.fetch(txn, rid.page, Permission::Shared)?;
        let slots = SlotPage::from_buffer(page.data_mut())?;
        Ok(slots.get_record(rid.slot)?.to_vec())
    }

    /// Read every live tuple under shared locks, in page and slot order
    pub fn scan(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
    ) -> BufferResult<Vec<(RecordId, Vec<u8>)>> {
        let mut tuples = Vec::new();
        for page_no in 0..self.num_pages()? {
            let key = self.page_key(page_no);
            let mut page = pool.fetch(txn, key, Permission::Shared)?;
            let slots = SlotPage::from_buffer(page.data_mut())?;
            for slot in slots.used_slots() {
                tuples.push((RecordId::new(key, slot), slots.get_record(slot)?.to_vec()));
            }
        }
        Ok(tuples)
    }
}

impl DbFile for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_page(&self, page_no: PageNo) -> FileResult<Page> {
        let mut buffer = vec![0u8; PAGE_SIZE];
        self.file.lock().read_page(page_no, &mut buffer)?;
        Page::new(self.page_key(page_no), buffer)
    }

    fn write_page(&self, page: &Page) -> FileResult<()> {
        self.file.lock().write_page(page.key().page_no, page.data())
    }

    fn num_pages(&self) -> FileResult<usize> {
        self.file.lock().page_count()
    }

    /// First-fit over existing pages, each taken exclusively. A page found full
    /// is unlocked again unless the transaction already held it. With no room
    /// anywhere a fresh page is appended.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &[u8],
    ) -> BufferResult<Vec<Page>> {
        if tuple.len() != self.record_size {
            return Err(RecordError::SizeMismatch {
                table_record_size: self.record_size,
                actual: tuple.len(),
            }
            .into());
        }

        for page_no in 0..self.num_pages()? {
            let key = self.page_key(page_no);
            let held_before = pool.holds_lock(txn, key);
            let mut page = pool.fetch(txn, key, Permission::Exclusive)?;
            if self.place(&mut page, tuple)?.is_some() {
                return Ok(vec![page]);
            }
            if !held_before {
                pool.release_lock(txn, key);
            }
        }

        // Another transaction may grab the new page first and fill it
        loop {
            let page_no = self.append_empty_page()?;
            let key = self.page_key(page_no);
            let mut page = pool.fetch(txn, key, Permission::Exclusive)?;
            if self.place(&mut page, tuple)?.is_some() {
                return Ok(vec![page]);
            }
            pool.release_lock(txn, key);
        }
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        rid: RecordId,
    ) -> BufferResult<Page> {
        if rid.page.table_id != self.table_id {
            return Err(RecordError::InvalidRecord(format!(
                "record {} does not belong to table {}",
                rid, self.table_id
            ))
            .into());
        }

        let mut page = pool.fetch(txn, rid.page, Permission::Exclusive)?;
        SlotPage::from_buffer(page.data_mut())?.mark_slot_free(rid.slot)?;
        Ok(page)
    }
}

fn check_record_size(record_size: usize) -> RecordResult<()> {
    if SlotPage::calculate_slot_count(record_size) == 0 {
        return Err(RecordError::InvalidRecord(format!(
            "Record size {} does not fit in a page",
            record_size
        )));
    }
    Ok(())
}
