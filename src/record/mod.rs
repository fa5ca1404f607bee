mod error;
mod heap_file;
mod page;

pub use error::{RecordError, RecordResult};
pub use heap_file::HeapFile;
pub use page::{PageHeader, SlotPage};

use crate::buffer::PageKey;
use std::fmt;

pub type SlotId = usize;

/// Physical identifier for a tuple (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page: PageKey,
    pub slot: SlotId,
}

impl RecordId {
    pub fn new(page: PageKey, slot: SlotId) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page, self.slot)
    }
}
