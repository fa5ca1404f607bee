use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::info;

use crate::buffer::{DbFile, TableId};
use crate::file::FileError;
use crate::record::{HeapFile, RecordError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("File error: {0}")]
    FileError(#[from] FileError),

    #[error("Record error: {0}")]
    RecordError(#[from] RecordError),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Persisted description of a heap table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub id: TableId,
    pub name: String,
    pub path: PathBuf,
    pub record_size: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogMetadata {
    tables: Vec<TableMetadata>,
}

struct TableEntry {
    name: String,
    file: Arc<dyn DbFile>,
    /// Set for tables backed by a [`HeapFile`]; only these are persisted
    heap: Option<(Arc<HeapFile>, TableMetadata)>,
}

#[derive(Default)]
struct CatalogState {
    by_id: AHashMap<TableId, TableEntry>,
    by_name: AHashMap<String, TableId>,
}

/// Registry of open tables, keyed by id and by name
pub struct Catalog {
    state: RwLock<CatalogState>,
    next_id: AtomicU32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Reserve a fresh table id
    pub fn next_table_id(&self) -> TableId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an already open file under `name`
    pub fn add_table(&self, name: &str, file: Arc<dyn DbFile>) -> CatalogResult<TableId> {
        self.insert(name, file, None)
    }

    /// Create `<dir>/<name>.tbl` and register it as a heap table
    pub fn create_heap_table<P: AsRef<Path>>(
        &self,
        dir: P,
        name: &str,
        record_size: usize,
    ) -> CatalogResult<TableId> {
        // Held across file creation so a rejected name never leaves a file behind
        let mut state = self.state.write();
        if state.by_name.contains_key(name) {
            return Err(CatalogError::TableExists(name.to_string()));
        }

        let id = self.next_table_id();
        let path = dir.as_ref().join(format!("{}.tbl", name));
        let heap = Arc::new(HeapFile::create(&path, id, record_size)?);
        let metadata = TableMetadata {
            id,
            name: name.to_string(),
            path: path.clone(),
            record_size,
        };
        if let Err(e) = self.register(&mut state, name, heap.clone(), Some((heap, metadata))) {
            fs::remove_file(&path)?;
            return Err(e);
        }
        info!(table = name, id, record_size, "created heap table");
        Ok(id)
    }

    fn insert(
        &self,
        name: &str,
        file: Arc<dyn DbFile>,
        heap: Option<(Arc<HeapFile>, TableMetadata)>,
    ) -> CatalogResult<TableId> {
        let mut state = self.state.write();
        self.register(&mut state, name, file, heap)
    }

    fn register(
        &self,
        state: &mut CatalogState,
        name: &str,
        file: Arc<dyn DbFile>,
        heap: Option<(Arc<HeapFile>, TableMetadata)>,
    ) -> CatalogResult<TableId> {
        let id = file.table_id();
        if state.by_name.contains_key(name) || state.by_id.contains_key(&id) {
            return Err(CatalogError::TableExists(name.to_string()));
        }

        // Keep ids handed out later clear of explicitly chosen ones
        self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
        state.by_name.insert(name.to_string(), id);
        state.by_id.insert(
            id,
            TableEntry {
                name: name.to_string(),
                file,
                heap,
            },
        );
        Ok(id)
    }

    pub fn file(&self, id: TableId) -> Option<Arc<dyn DbFile>> {
        self.state.read().by_id.get(&id).map(|entry| entry.file.clone())
    }

    pub fn heap_file(&self, id: TableId) -> Option<Arc<HeapFile>> {
        self.state
            .read()
            .by_id
            .get(&id)
            .and_then(|entry| entry.heap.as_ref())
            .map(|(heap, _)| heap.clone())
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.state.read().by_name.get(name).copied()
    }

    pub fn table_name(&self, id: TableId) -> Option<String> {
        self.state.read().by_id.get(&id).map(|entry| entry.name.clone())
    }

    /// Look a table up by name or fail with [`CatalogError::TableNotFound`]
    pub fn get_table(&self, name: &str) -> CatalogResult<TableId> {
        self.table_id(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    /// Registered table ids in ascending order
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.state.read().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the heap table list as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CatalogResult<()> {
        let state = self.state.read();
        let mut tables: Vec<TableMetadata> = state
            .by_id
            .values()
            .filter_map(|entry| entry.heap.as_ref())
            .map(|(_, metadata)| metadata.clone())
            .collect();
        tables.sort_by_key(|metadata| metadata.id);
        drop(state);

        let content = serde_json::to_string_pretty(&CatalogMetadata { tables })?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Read a catalog written by [`save`](Self::save) and reopen its heap tables
    pub fn load<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let content = fs::read_to_string(path)?;
        let metadata: CatalogMetadata = serde_json::from_str(&content)?;

        let catalog = Self::new();
        for table in metadata.tables {
            let heap = Arc::new(HeapFile::open(&table.path, table.id, table.record_size)?);
            let name = table.name.clone();
            catalog.insert(&name, heap.clone(), Some((heap, table)))?;
        }
        info!(tables = catalog.len(), "loaded catalog");
        Ok(catalog)
    }
}
