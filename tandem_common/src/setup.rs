//! Persistent application setup file.
//!
//! A setup file is a TOML document with a mandatory top-level `appname` and
//! free-form nested tables. Parameters are addressed by key path
//! (`&["controller", "kp"]`). Changes are made in memory and written back
//! with [`SetupFile::save`] (atomic replace) or reconciled with the file on
//! disk through [`SetupFile::sync`].
//!
//! ```toml
//! appname = "linefollower"
//!
//! [controller]
//! kp = 1.5
//! ti = 0.2
//! ```

use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Setup file errors.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Underlying I/O failure.
    #[error("setup file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax error.
    #[error("setup file {path}: parse error: {message}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The document lacks a string `appname` key.
    #[error("setup file {path}: missing top-level 'appname'")]
    MissingAppname {
        /// File path.
        path: PathBuf,
    },

    /// Key path does not exist.
    #[error("setup parameter '{0}' not found")]
    PathNotFound(String),

    /// An intermediate key path element is a scalar, not a table.
    #[error("setup parameter '{0}' is not a table")]
    NotATable(String),

    /// Empty key path.
    #[error("empty setup parameter path")]
    EmptyPath,

    /// Value could not be converted to the requested type.
    #[error("setup parameter '{path}': {message}")]
    Convert {
        /// Dotted key path.
        path: String,
        /// Deserializer message.
        message: String,
    },

    /// Document could not be serialized.
    #[error("setup serialization failed: {0}")]
    Serialize(String),
}

/// Result of [`SetupFile::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Neither side changed.
    Unchanged,
    /// In-memory changes were written to disk.
    Saved,
    /// The file changed on disk and was reloaded.
    Reloaded,
    /// Both sides changed; the in-memory document was written.
    ConflictKeptMemory,
}

/// In-memory view of a setup file.
#[derive(Debug, Clone)]
pub struct SetupFile {
    path: PathBuf,
    document: toml::Table,
    dirty: bool,
    disk_mtime: Option<SystemTime>,
}

impl SetupFile {
    /// Load and validate an existing setup file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref().to_path_buf();
        let (document, disk_mtime) = read_document(&path)?;
        debug!(path = %path.display(), "setup file loaded");
        Ok(Self {
            path,
            document,
            dirty: false,
            disk_mtime,
        })
    }

    /// Create a new setup file containing only `appname` and write it.
    pub fn create(path: impl AsRef<Path>, appname: &str) -> Result<Self, SetupError> {
        let mut document = toml::Table::new();
        document.insert("appname".into(), toml::Value::String(appname.into()));
        let mut setup = Self {
            path: path.as_ref().to_path_buf(),
            document,
            dirty: true,
            disk_mtime: None,
        };
        setup.save()?;
        Ok(setup)
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Application name.
    pub fn appname(&self) -> &str {
        self.document
            .get("appname")
            .and_then(toml::Value::as_str)
            .unwrap_or_default()
    }

    /// Whole document.
    pub fn document(&self) -> &toml::Table {
        &self.document
    }

    /// True when in-memory changes have not been saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Raw value at `path`, if present.
    pub fn get(&self, path: &[&str]) -> Option<&toml::Value> {
        let (last, parents) = path.split_last()?;
        let mut table = &self.document;
        for key in parents {
            table = table.get(*key)?.as_table()?;
        }
        table.get(*last)
    }

    /// Typed value at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T, SetupError> {
        let dotted = path.join(".");
        let value = self
            .get(path)
            .ok_or_else(|| SetupError::PathNotFound(dotted.clone()))?;
        value.clone().try_into().map_err(|e: toml::de::Error| SetupError::Convert {
            path: dotted,
            message: e.to_string(),
        })
    }

    /// Set the value at `path`, creating intermediate tables.
    ///
    /// The document is marked dirty only when the stored value changes.
    pub fn paramvalue_change(
        &mut self,
        path: &[&str],
        value: impl Into<toml::Value>,
    ) -> Result<(), SetupError> {
        let (last, parents) = path.split_last().ok_or(SetupError::EmptyPath)?;
        let value = value.into();
        let mut table = &mut self.document;
        for (depth, key) in parents.iter().enumerate() {
            let entry = table
                .entry(key.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            table = entry
                .as_table_mut()
                .ok_or_else(|| SetupError::NotATable(path[..=depth].join(".")))?;
        }
        if table.get(*last) != Some(&value) {
            table.insert(last.to_string(), value);
            self.dirty = true;
        }
        Ok(())
    }

    /// Atomically write the document to disk.
    pub fn save(&mut self) -> Result<(), SetupError> {
        let text =
            toml::to_string(&self.document).map_err(|e| SetupError::Serialize(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| SetupError::Io {
            path: self.path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(text.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        self.disk_mtime = modified(&self.path);
        self.dirty = false;
        info!(path = %self.path.display(), "setup file saved");
        Ok(())
    }

    /// Reconcile the in-memory document with the file on disk.
    ///
    /// Unsaved memory changes win over concurrent disk edits.
    pub fn sync(&mut self) -> Result<SyncOutcome, SetupError> {
        let on_disk = modified(&self.path);
        let disk_changed = on_disk.is_none() || on_disk != self.disk_mtime;
        match (self.dirty, disk_changed) {
            (false, false) => Ok(SyncOutcome::Unchanged),
            (true, false) => {
                self.save()?;
                Ok(SyncOutcome::Saved)
            }
            (false, true) if on_disk.is_some() => {
                let (document, mtime) = read_document(&self.path)?;
                self.document = document;
                self.disk_mtime = mtime;
                info!(path = %self.path.display(), "setup file reloaded");
                Ok(SyncOutcome::Reloaded)
            }
            (false, true) => {
                self.save()?;
                Ok(SyncOutcome::Saved)
            }
            (true, true) => {
                warn!(path = %self.path.display(), "setup file changed on disk and in memory; keeping memory");
                self.save()?;
                Ok(SyncOutcome::ConflictKeptMemory)
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_document(path: &Path) -> Result<(toml::Table, Option<SystemTime>), SetupError> {
    let text = fs::read_to_string(path).map_err(|source| SetupError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: toml::Table = toml::from_str(&text).map_err(|e| SetupError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if !matches!(document.get("appname"), Some(toml::Value::String(_))) {
        return Err(SetupError::MissingAppname {
            path: path.to_path_buf(),
        });
    }
    Ok((document, modified(path)))
}
