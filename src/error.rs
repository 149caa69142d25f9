//! Error types shared by the sort and undo engines.
//!
//! Only failures that stop a whole operation live here. Problems with a
//! single file are collected as [`FileIssue`](crate::progress::FileIssue)s
//! in the run summary instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("invalid extension '{value}': {reason}")]
    InvalidExtension { value: String, reason: String },

    #[error("invalid folder name '{value}': {reason}")]
    InvalidFolderName { value: String, reason: String },

    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("no previous sort found to undo in {}", .0.display())]
    NoSessionToUndo(PathBuf),

    #[error("could not persist the sort session at {}: {source}", path.display())]
    SessionPersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {} is not readable: {reason}", path.display())]
    InvalidSessionFormat { path: PathBuf, reason: String },

    #[error("another sort or undo is already running on {}", .0.display())]
    DirectoryBusy(PathBuf),

    #[error("could not lock {}: {source}", path.display())]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list directory {}: {source}", path.display())]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker thread panicked")]
    WorkerPanicked,
}

pub type SortResult<T> = Result<T, SortError>;
