use std::fmt;

use crate::file::{FileError, FileResult, PAGE_SIZE, PageNo};
use crate::transaction::TransactionId;

/// Table identifier assigned by the catalog
pub type TableId = u32;

/// Identifies a page within a table; the cache key and the lock key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub table_id: TableId,
    pub page_no: PageNo,
}

impl PageKey {
    pub fn new(table_id: TableId, page_no: PageNo) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// A cached page: raw content, the transaction that dirtied it, and the
/// content as of the last flush or initial load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    key: PageKey,
    data: Vec<u8>,
    dirty: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl Page {
    /// Wrap freshly read content. The before-image starts equal to it.
    pub fn new(key: PageKey, data: Vec<u8>) -> FileResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            key,
            before_image: data.clone(),
            data,
            dirty: None,
        })
    }

    /// A zero-filled page
    pub fn empty(key: PageKey) -> Self {
        Self {
            key,
            data: vec![0; PAGE_SIZE],
            dirty: None,
            before_image: vec![0; PAGE_SIZE],
        }
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The transaction whose uncommitted writes this page holds, if any
    pub fn dirty_owner(&self) -> Option<TransactionId> {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    pub fn mark_dirty(&mut self, owner: Option<TransactionId>) {
        self.dirty = owner;
    }

    /// A clean copy of this page holding its before-image content
    pub fn before_image(&self) -> Page {
        Page {
            key: self.key,
            data: self.before_image.clone(),
            dirty: None,
            before_image: self.before_image.clone(),
        }
    }

    pub fn before_image_data(&self) -> &[u8] {
        &self.before_image
    }

    /// Freeze the current content as the rollback baseline
    pub fn set_before_image(&mut self) {
        self.before_image.copy_from_slice(&self.data);
    }

    /// Undo every change since the last baseline and clear the dirty owner
    pub fn restore_before_image(&mut self) {
        self.data.copy_from_slice(&self.before_image);
        self.dirty = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_size() {
        let result = Page::new(PageKey::new(1, 0), vec![0u8; 10]);
        assert!(matches!(
            result,
            Err(FileError::InvalidPageSize { actual: 10, .. })
        ));
    }

    #[test]
    fn test_before_image_lifecycle() {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = b'A';
        let mut page = Page::new(PageKey::new(1, 0), data).unwrap();
        let txn = TransactionId::new();

        page.data_mut()[0] = b'B';
        page.mark_dirty(Some(txn));
        assert_eq!(page.dirty_owner(), Some(txn));
        assert_eq!(page.before_image().data()[0], b'A');
        assert!(!page.before_image().is_dirty());

        page.restore_before_image();
        assert_eq!(page.data()[0], b'A');
        assert!(!page.is_dirty());

        page.data_mut()[0] = b'C';
        page.set_before_image();
        assert_eq!(page.before_image_data()[0], b'C');
    }

    #[test]
    fn test_key_display() {
        assert_eq!(PageKey::new(3, 17).to_string(), "3:17");
    }
}
