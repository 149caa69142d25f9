//! foldersort - sort a directory's files into folders by extension, and
//! undo it.
//!
//! The engines in [`sort_engine`] and [`undo`] do the work; [`jobs`] adds
//! per-directory locking and runs them on worker threads with progress
//! events and cancellation. Every sort leaves a session ledger in the target
//! directory, which is what makes the undo exact.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod file_organizer;
pub mod jobs;
pub mod logging;
pub mod output;
pub mod progress;
pub mod recorder;
pub mod sort_engine;
pub mod undo;
pub mod validation;

pub use classifier::{ExtensionMap, classify};
pub use config::{CompiledFilters, ConfigError, Settings};
pub use error::{SortError, SortResult};
pub use file_organizer::FileOrganizer;
pub use jobs::{DirectoryGuard, DirectoryLocks, JobHandle, Organizer};
pub use progress::{CancelToken, EngineEvent, FileIssue, IssueKind, Progress, RunState};
pub use recorder::{MoveRecord, MoveRecorder, SortSession};
pub use sort_engine::{SortEngine, SortPlan, SortRequest, SortSummary};
pub use undo::{UndoEngine, UndoOutcome, UndoReport};

pub use cli::{OrganizeCommand, run_cli};
