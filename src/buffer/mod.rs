//! The transactional page cache and the lock manager it consults.

mod buffer_pool;
mod config;
mod db_file;
mod error;
mod lock_manager;
mod page;


pub use buffer_pool::BufferPool;
pub use config::{
    ConfigError, ConfigResult, DEFAULT_ABORT_TIMEOUT, DEFAULT_PAGES, DEFAULT_POLL_INTERVAL,
    PoolConfig,
};
pub use db_file::DbFile;
pub use error::{BufferError, BufferResult};
pub use lock_manager::{LockManager, Permission};
pub use page::{Page, PageKey, TableId};
