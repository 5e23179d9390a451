//! Enumerates `.dem` files in the configured directory and enforces the
//! selection-safety invariants: path containment and the
//! `HL2DEMO` magic-byte check. Grounded in
//! `original_source/server/demo_parser.py::DemoSource` and
//! `original_source/tests/test_ws_server.py`'s path-traversal/magic-byte
//! scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{EngineError, EngineResult};

pub const DEMO_MAGIC: &[u8; 7] = b"HL2DEMO";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemoEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

pub struct DemoSource {
    directory: PathBuf,
}

impl DemoSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// All `*.dem` files in the directory, sorted by modification time
    /// descending (newest first). Unreadable entries are skipped rather than
    /// failing the whole listing.
    pub fn list(&self) -> EngineResult<Vec<DemoEntry>> {
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&self.directory) {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(EngineError::Io(err)),
        };

        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dem") {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            entries.push(DemoEntry { name: name.to_string(), path, modified });
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Newest valid `.dem` file, or `None` if the directory is empty or every
    /// entry fails validation.
    pub fn latest_valid(&self) -> EngineResult<Option<DemoEntry>> {
        for entry in self.list()? {
            if Self::is_valid(&entry.path) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Resolve `name` to a path inside the demo directory, rejecting
    /// traversal, wrong suffix, and non-existence. Never follows a name to
    /// anywhere outside the configured directory, even via `..` or a
    /// symlink that escapes it.
    pub fn resolve(&self, name: &str) -> EngineResult<PathBuf> {
        if !name.ends_with(".dem") {
            return Err(EngineError::PathEscapesDemoDirectory(PathBuf::from(name)));
        }

        let candidate = self.directory.join(name);
        let canonical_dir = fs::canonicalize(&self.directory).map_err(EngineError::Io)?;
        let canonical_candidate = fs::canonicalize(&candidate)
            .map_err(|_| EngineError::DemoNotFound(candidate.clone()))?;

        if !canonical_candidate.starts_with(&canonical_dir) {
            return Err(EngineError::PathEscapesDemoDirectory(candidate));
        }

        Ok(canonical_candidate)
    }

    /// First 7 bytes must equal `HL2DEMO`. Any I/O failure is "not valid",
    /// never an error — validation never interrupts a listing.
    pub fn is_valid(path: &Path) -> bool {
        let Ok(bytes) = fs::read(path) else {
            return false;
        };
        bytes.len() >= DEMO_MAGIC.len() && &bytes[..DEMO_MAGIC.len()] == DEMO_MAGIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempdir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("snapshot-engine-demo-source-{}-{}-{:?}", std::process::id(), label, std::time::Instant::now()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_demo(dir: &Path, name: &str, magic_ok: bool) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        if magic_ok {
            file.write_all(b"HL2DEMO\0rest-of-file").unwrap();
        } else {
            file.write_all(b"NOTDEMO\0rest-of-file").unwrap();
        }
        path
    }

    #[test]
    fn path_traversal_is_rejected() {
        let dir = tempdir("traversal");
        let source = DemoSource::new(&dir);
        assert!(source.resolve("../escape.dem").is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn magic_check_distinguishes_valid_and_invalid() {
        let dir = tempdir("magic");
        let valid = write_demo(&dir, "valid.dem", true);
        let invalid = write_demo(&dir, "invalid.dem", false);
        assert!(DemoSource::is_valid(&valid));
        assert!(!DemoSource::is_valid(&invalid));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn list_sorts_by_mtime_descending() {
        let dir = tempdir("ordering");
        write_demo(&dir, "older.dem", true);
        std::thread::sleep(std::time::Duration::from_millis(10));
        write_demo(&dir, "newer.dem", true);

        let source = DemoSource::new(&dir);
        let names: Vec<String> = source.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["newer.dem".to_string(), "older.dem".to_string()]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_rejects_nonexistent_file() {
        let dir = tempdir("missing");
        let source = DemoSource::new(&dir);
        assert!(source.resolve("missing.dem").is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_rejects_non_dem_suffix() {
        let dir = tempdir("suffix");
        write_demo(&dir, "not-a-demo.txt", true);
        let source = DemoSource::new(&dir);
        assert!(source.resolve("not-a-demo.txt").is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
