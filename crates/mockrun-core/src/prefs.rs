use crate::CoreError;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const PREFS_FILE: &str = "prefs.json";

/// Flat JSON key/value preference file.
#[derive(Debug, Clone)]
pub struct Prefs {
    path: PathBuf,
}

impl Prefs {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(PREFS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All properties; a missing file reads as empty.
    pub fn load(&self) -> Result<Map<String, Value>, CoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn read_string(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .load()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    pub fn read_int(&self, key: &str) -> Result<Option<i64>, CoreError> {
        Ok(self.load()?.get(key).and_then(Value::as_i64))
    }

    pub fn write_property(&self, key: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        self.write_properties(vec![(key.to_owned(), value.into())])
    }

    /// Read-modify-write under an exclusive lock, replacing the file atomically.
    pub fn write_properties(&self, entries: Vec<(String, Value)>) -> Result<(), CoreError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| CoreError::Config(format!("invalid prefs path {}", self.path.display())))?;
        fs::create_dir_all(dir)?;
        let _lock = PrefsLock::acquire(&dir.join(".prefs.lock"))?;

        let mut props = self.load()?;
        for (key, value) in entries {
            props.insert(key, value);
        }

        let content = serde_json::to_string_pretty(&Value::Object(props))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }
}

struct PrefsLock {
    file: File,
}

impl PrefsLock {
    fn acquire(path: &Path) -> Result<Self, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for PrefsLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
