use thiserror::Error;

use super::config::ConfigError;
use super::page::{PageKey, TableId};
use crate::file::FileError;
use crate::record::RecordError;
use crate::transaction::TransactionId;

#[derive(Debug, Error)]
pub enum BufferError {
    /// The transaction waited past its deadline for a lock. The caller must abort it.
    #[error("Transaction {0} aborted: lock wait exceeded the abort timeout")]
    TransactionAborted(TransactionId),

    #[error("Transaction {txn} does not hold an exclusive lock on page {page}")]
    NotLocked { txn: TransactionId, page: PageKey },

    #[error("Buffer pool exhausted: all {capacity} cached pages are dirty")]
    CapacityExhausted { capacity: usize },

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Unknown table: {0}")]
    UnknownTable(TableId),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type BufferResult<T> = Result<T, BufferError>;
