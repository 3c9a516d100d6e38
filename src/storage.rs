//! Read-only access to database files on disk.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// A database file location.
///
/// `Storage` only hands out read streams; nothing in this crate writes a
/// database back.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns `true` if the database file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Opens a buffered read stream positioned at offset 0.
    ///
    /// The file is closed when the returned stream is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open(&self) -> Result<BufReader<File>> {
        if !self.exists() {
            bail!("database {} does not exist", self.path.display());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open database {}", self.path.display()))?;
        Ok(BufReader::new(file))
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
