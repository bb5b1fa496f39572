//! Filesystem access for tables served from a local directory.
//!
//! Only [`LocalLogClient`](crate::remote::local::LocalLogClient) reads through
//! here; data files are never opened by the engine.
use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use snafu::prelude::*;
use tokio::fs;

/// Result alias for storage reads.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root of a locally hosted table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableLocation {
    /// Directory on the local filesystem.
    Local(PathBuf),
}

impl TableLocation {
    /// Location rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Absolute path of `rel` below this root.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        match self {
            TableLocation::Local(root) => root.join(rel),
        }
    }
}

impl fmt::Display for TableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLocation::Local(root) => root.display().fmt(f),
        }
    }
}

/// A failed read below a [`TableLocation`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// Nothing exists at `path`.
    #[snafu(display("{} does not exist", path.display()))]
    Missing {
        /// Absolute path that was read.
        path: PathBuf,
        /// The `NotFound` error from the OS.
        source: io::Error,
    },

    /// Any other I/O failure.
    #[snafu(display("I/O failure at {}: {source}", path.display()))]
    Io {
        /// Absolute path that was read.
        path: PathBuf,
        /// OS error.
        source: io::Error,
    },
}

impl StorageError {
    /// True when the file or directory is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Missing { .. })
    }

    fn from_io(source: io::Error, path: PathBuf) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::Missing { path, source }
        } else {
            StorageError::Io { path, source }
        }
    }
}

/// Contents of `rel_path` as UTF-8.
pub async fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let path = location.resolve(rel_path);
    match fs::read_to_string(&path).await {
        Ok(text) => Ok(text),
        Err(e) => Err(StorageError::from_io(e, path)),
    }
}

/// Sorted names of the regular files directly inside `rel_dir`. Names that
/// are not valid UTF-8 are skipped.
pub async fn list_file_names(location: &TableLocation, rel_dir: &Path) -> StorageResult<Vec<String>> {
    let dir = location.resolve(rel_dir);
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) => return Err(StorageError::from_io(e, dir)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.context(IoSnafu { path: &dir })? {
        let is_file = entry
            .file_type()
            .await
            .context(IoSnafu { path: entry.path() })?
            .is_file();
        if let (true, Ok(name)) = (is_file, entry.file_name().into_string()) {
            names.push(name);
        }
    }
    names.sort_unstable();
    Ok(names)
}
