//! Parsed data file cache
//!
//! Files are parsed once and served from memory until their inode,
//! modification time or size changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};

/// Identity of a file's contents as seen by the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    inode: u64,
    mtime: Option<SystemTime>,
    size: u64,
}

impl FileStamp {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            inode: inode(&meta),
            mtime: meta.modified().ok(),
            size: meta.len(),
        })
    }
}

#[cfg(unix)]
fn inode(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &fs::Metadata) -> u64 {
    0
}

#[derive(Debug)]
struct Entry {
    stamp: FileStamp,
    data: Arc<Value>,
}

/// Cache of parsed files keyed by path
#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl FileCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse `path`, failing on I/O and parse errors and when the
    /// parsed value is not of the `expected` kind.
    ///
    /// Only successful reads are cached.
    pub fn read_file<F>(&self, path: &Path, expected: ValueKind, parse: F) -> Result<Arc<Value>>
    where
        F: FnOnce(&str) -> Result<Value>,
    {
        let stamp = FileStamp::of(path)
            .map_err(|e| Error::io(path, format!("Failed to stat data file: {}", e)))?;

        if let Some(data) = self.cached(path, stamp)? {
            return Ok(data);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(path, format!("Failed to read data file: {}", e)))?;
        let data = parse(&content).map_err(|e| e.with_file(path))?;

        if data.kind() != expected {
            return Err(Error::type_mismatch(
                path.display().to_string(),
                format!(
                    "Data retrieved from {} is {} not {}",
                    path.display(),
                    data.type_name(),
                    expected.name()
                ),
            ));
        }

        let data = Arc::new(data);
        self.store(path, stamp, Arc::clone(&data))?;
        Ok(data)
    }

    /// Like [`FileCache::read_file`], but logs failures and caches and
    /// returns `default` instead.
    pub fn read<F>(
        &self,
        path: &Path,
        expected: ValueKind,
        default: Value,
        parse: F,
    ) -> Result<Arc<Value>>
    where
        F: FnOnce(&str) -> Result<Value>,
    {
        match self.read_file(path, expected, parse) {
            Ok(data) => Ok(data),
            Err(err) => {
                log::warn!("Reading data from {} failed: {}", path.display(), err);
                let data = Arc::new(default);
                // A stat failure leaves nothing to key the default on
                if let Ok(stamp) = FileStamp::of(path) {
                    self.store(path, stamp, Arc::clone(&data))?;
                }
                Ok(data)
            }
        }
    }

    /// Number of cached files
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, path: &Path, stamp: FileStamp) -> Result<Option<Arc<Value>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("file cache lock poisoned"))?;
        Ok(entries
            .get(path)
            .filter(|entry| entry.stamp == stamp)
            .map(|entry| Arc::clone(&entry.data)))
    }

    fn store(&self, path: &Path, stamp: FileStamp, data: Arc<Value>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("file cache lock poisoned"))?;
        entries.insert(path.to_path_buf(), Entry { stamp, data });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn parse_yaml(content: &str) -> Result<Value> {
        serde_yaml::from_str(content).map_err(|e| Error::parse(e.to_string()))
    }

    #[test]
    fn test_read_file_parses_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        fs::write(&path, "http_port: 8080\n").unwrap();

        let cache = FileCache::new();
        let parses = Cell::new(0);
        let counting = |content: &str| {
            parses.set(parses.get() + 1);
            parse_yaml(content)
        };

        let first = cache.read_file(&path, ValueKind::Mapping, counting).unwrap();
        let second = cache.read_file(&path, ValueKind::Mapping, counting).unwrap();

        assert_eq!(first, second);
        assert_eq!(parses.get(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(first.as_mapping().unwrap()["http_port"], Value::Integer(8080));
    }

    #[test]
    fn test_changed_file_is_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        fs::write(&path, "a: 1\n").unwrap();

        let cache = FileCache::new();
        let before = cache.read_file(&path, ValueKind::Mapping, parse_yaml).unwrap();
        assert_eq!(before.as_mapping().unwrap()["a"], Value::Integer(1));

        // Size changes even if the mtime granularity hides the write
        fs::write(&path, "a: 12345\n").unwrap();
        let after = cache.read_file(&path, ValueKind::Mapping, parse_yaml).unwrap();
        assert_eq!(after.as_mapping().unwrap()["a"], Value::Integer(12345));
    }

    #[test]
    fn test_read_file_wrong_kind_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.yaml");
        fs::write(&path, "- a\n- b\n").unwrap();

        let cache = FileCache::new();
        let err = cache
            .read_file(&path, ValueKind::Mapping, parse_yaml)
            .unwrap_err();

        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
        assert!(err.to_string().contains("is sequence not mapping"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_read_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new();

        let err = cache
            .read_file(&dir.path().join("missing.yaml"), ValueKind::Mapping, parse_yaml)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_read_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let cache = FileCache::new();
        let parse_json = |content: &str| -> Result<Value> {
            serde_json::from_str(content).map_err(|e| Error::parse(e.to_string()))
        };

        let data = cache
            .read(&path, ValueKind::Mapping, Value::Mapping(Default::default()), parse_json)
            .unwrap();

        assert_eq!(*data, Value::Mapping(Default::default()));
        assert_eq!(cache.len(), 1);
    }
}
