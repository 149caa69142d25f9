//! Events and cancellation shared between an engine run and its caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a sort or undo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Moving,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

/// Snapshot emitted after each file is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed_count: usize,
    pub total_count: usize,
    pub current_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// The file was left where it was without attempting the move.
    Skipped,
    /// The move was attempted and failed.
    MoveFailed,
}

/// A problem with one file; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIssue {
    pub path: PathBuf,
    pub kind: IssueKind,
    pub reason: String,
}

impl FileIssue {
    pub fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            kind: IssueKind::Skipped,
            reason: reason.into(),
        }
    }

    pub fn failed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            kind: IssueKind::MoveFailed,
            reason: reason.into(),
        }
    }
}

/// Everything a running engine reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    State(RunState),
    Progress(Progress),
    Issue(FileIssue),
}

/// Cooperative cancellation flag, checked by the engines between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());

        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Moving.is_terminal());
        assert!(!RunState::Idle.is_terminal());
    }
}
