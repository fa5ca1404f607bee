use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(usize),

    #[error("Slot {0} holds no record")]
    SlotEmpty(usize),

    #[error("Record of {table_record_size} bytes expected, got {actual}")]
    SizeMismatch {
        table_record_size: usize,
        actual: usize,
    },

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
