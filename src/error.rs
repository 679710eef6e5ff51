use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NxError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    FileRead { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    FileWrite { path: PathBuf, source: io::Error },

    #[error("failed to sync {}: {source}", path.display())]
    FileSync { path: PathBuf, source: io::Error },

    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreate { path: PathBuf, source: io::Error },

    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("notebook not found: {0}")]
    NotebookNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("external tool error: {0}")]
    ExternalTool(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("system error: {0}")]
    System(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Which filesystem step an [`io::Error`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Sync,
    CreateDir,
}

impl NxError {
    /// Classifies an I/O error raised while operating on `path`.
    ///
    /// Missing files and permission problems get their own variants no matter
    /// which step failed, everything else is reported against `op`.
    pub fn from_io(path: &Path, op: IoOp, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound if op != IoOp::CreateDir => NxError::FileNotFound(path),
            io::ErrorKind::PermissionDenied => NxError::PermissionDenied(path),
            _ => match op {
                IoOp::Read => NxError::FileRead { path, source: err },
                IoOp::Write => NxError::FileWrite { path, source: err },
                IoOp::Sync => NxError::FileSync { path, source: err },
                IoOp::CreateDir => NxError::DirectoryCreate { path, source: err },
            },
        }
    }

    /// True for every flavour of "the thing you asked for is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NxError::FileNotFound(_)
                | NxError::DirectoryNotFound(_)
                | NxError::NoteNotFound(_)
                | NxError::NotebookNotFound(_)
        )
    }
}

pub type NxResult<T> = Result<T, NxError>;
