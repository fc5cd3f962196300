// vim: tw=80
//! Persistent per-chunk metadata store
//!
//! One store per process, keyed by chunk path.  Phase ordering makes
//! conflicting writers impossible: during planning only the gathering
//! collector touches a path's record, and during execution only the
//! involved collector persists the outcome after the broadcast barrier.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::record::ChunkRecord;
use crate::types::*;

/// The durable key/value interface the planner and executor write through
#[cfg_attr(test, mockall::automock)]
pub trait MetadataStore {
    fn get(&self, path: &str) -> Result<Option<ChunkRecord>>;
    fn set(&mut self, path: &str, rec: &ChunkRecord) -> Result<()>;
    /// Make everything written so far durable
    fn flush(&mut self) -> Result<()>;
}

/// Bincode-snapshot store at `<store_root>/metadata.db`
pub struct FileStore {
    file: PathBuf,
    map: HashMap<String, ChunkRecord>,
    dirty: bool,
}

impl FileStore {
    pub const FILENAME: &'static str = "metadata.db";

    pub fn open(store_root: &Path) -> Result<Self> {
        let file = store_root.join(Self::FILENAME);
        let map = match std::fs::read(&file) {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(FileStore { file, map, dirty: false })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl MetadataStore for FileStore {
    fn get(&self, path: &str) -> Result<Option<ChunkRecord>> {
        Ok(self.map.get(path).copied())
    }

    fn set(&mut self, path: &str, rec: &ChunkRecord) -> Result<()> {
        self.map.insert(path.to_string(), *rec);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = bincode::serialize(&self.map)?;
        let tmp = self.file.with_extension("db.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.file)?;
        self.dirty = false;
        Ok(())
    }
}
