/// Undo functionality for reverting a sort pass.
///
/// The session ledger is replayed newest-first. Each restored file is
/// dropped from the persisted session as soon as it is back, so an
/// interrupted or partially failed undo leaves exactly the work that is
/// still outstanding.
use crate::conflict;
use crate::error::SortResult;
use crate::file_organizer::FileOrganizer;
use crate::jobs::DirectoryGuard;
use crate::progress::{CancelToken, EngineEvent, FileIssue, Progress, RunState};
use crate::recorder::{MoveRecord, MoveRecorder, SortSession};
use crate::validation::validate_within;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Every record was replayed and the session is gone.
    Complete,
    /// Some records failed; they stay in the session for a retry.
    Partial,
    /// Stopped early; the unreplayed records stay in the session.
    Cancelled,
}

/// Represents the result of an undo operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoReport {
    pub outcome: UndoOutcome,
    /// Records in the session when the undo started.
    pub total: usize,
    /// Files moved back.
    pub restored_files: usize,
    /// Records whose file was already back at its original location.
    pub already_in_place: usize,
    /// Files restored under a numbered name because the original spot was
    /// taken.
    pub renamed_on_restore: Vec<PathBuf>,
    pub failed_restores: Vec<FileIssue>,
    /// Empty folders created by the sort and removed again.
    pub removed_folders: Vec<PathBuf>,
}

impl UndoReport {
    fn new(total: usize) -> Self {
        Self {
            outcome: UndoOutcome::Complete,
            total,
            restored_files: 0,
            already_in_place: 0,
            renamed_on_restore: Vec::new(),
            failed_restores: Vec::new(),
            removed_folders: Vec::new(),
        }
    }

    /// Returns true if the undo was completely successful.
    pub fn is_complete_success(&self) -> bool {
        self.outcome == UndoOutcome::Complete
    }
}

enum Restored {
    Moved(PathBuf),
    AlreadyInPlace,
}

/// What replaying one record needs to do.
enum Check {
    AlreadyInPlace,
    Ready { source: PathBuf, dest: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct UndoEngine {
    recorder: MoveRecorder,
}

impl UndoEngine {
    pub fn new(recorder: MoveRecorder) -> Self {
        Self { recorder }
    }

    /// Undoes the most recent sort of the directory held by `guard`.
    ///
    /// Fails with [`SortError::NoSessionToUndo`](crate::error::SortError)
    /// when there is nothing to undo, and with a persistence error if the
    /// shrinking session cannot be written back.
    pub fn run(
        &self,
        guard: &DirectoryGuard,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<UndoReport> {
        let result = self.replay(guard.directory(), on_event, cancel);
        match &result {
            Ok(report) => {
                let state = match report.outcome {
                    UndoOutcome::Cancelled => RunState::Cancelled,
                    UndoOutcome::Complete | UndoOutcome::Partial => RunState::Completed,
                };
                on_event(EngineEvent::State(state));
            }
            Err(e) => {
                warn!(directory = %guard.directory().display(), error = %e, "Undo failed");
                on_event(EngineEvent::State(RunState::Failed));
            }
        }
        result
    }

    fn replay(
        &self,
        target: &Path,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<UndoReport> {
        on_event(EngineEvent::State(RunState::Scanning));
        let mut session = self.recorder.load(target)?;
        if session.target_directory != target {
            warn!(
                recorded = %session.target_directory.display(),
                directory = %target.display(),
                "Session was recorded for a different path"
            );
        }

        let total = session.records.len();
        let mut report = UndoReport::new(total);
        info!(directory = %target.display(), records = total, "Starting undo");
        on_event(EngineEvent::State(RunState::Moving));

        for index in (0..total).rev() {
            if cancel.is_cancelled() {
                info!(remaining = index + 1, "Undo cancelled");
                report.outcome = UndoOutcome::Cancelled;
                return Ok(report);
            }

            let record = session.records[index].clone();
            match self.restore_record(target, &mut session, index)? {
                Ok(restored) => {
                    match restored {
                        Restored::Moved(path) => {
                            report.restored_files += 1;
                            if path != record.source_path {
                                report.renamed_on_restore.push(path);
                            }
                        }
                        Restored::AlreadyInPlace => report.already_in_place += 1,
                    }
                    session.records.remove(index);
                    self.recorder.save(&session)?;
                }
                Err(issue) => {
                    warn!(
                        path = %issue.path.display(),
                        reason = %issue.reason,
                        "Could not restore file"
                    );
                    on_event(EngineEvent::Issue(issue.clone()));
                    report.failed_restores.push(issue);
                }
            }

            on_event(EngineEvent::Progress(Progress {
                processed_count: total - index,
                total_count: total,
                current_filename: record
                    .source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }));
        }

        if report.failed_restores.is_empty() {
            report.removed_folders = remove_empty_folders(target, &session);
            self.recorder.clear(target)?;
            report.outcome = UndoOutcome::Complete;
        } else {
            report.outcome = UndoOutcome::Partial;
        }

        info!(
            restored = report.restored_files,
            failed = report.failed_restores.len(),
            outcome = ?report.outcome,
            "Undo finished"
        );
        Ok(report)
    }

    /// Replays `session.records[index]`. The outer `Err` is reserved for
    /// ledger failures, which end the undo.
    ///
    /// A committed record is uncommitted before its file moves back, so a
    /// crash mid-restore leaves it looking like a move that never happened.
    fn restore_record(
        &self,
        target: &Path,
        session: &mut SortSession,
        index: usize,
    ) -> SortResult<Result<Restored, FileIssue>> {
        let record = session.records[index].clone();
        let (source, dest) = match check_record(target, &record) {
            Ok(Check::AlreadyInPlace) => return Ok(Ok(Restored::AlreadyInPlace)),
            Ok(Check::Ready { source, dest }) => (source, dest),
            Err(issue) => return Ok(Err(issue)),
        };

        if record.committed {
            session.records[index].committed = false;
            self.recorder.save(session)?;
        }

        match move_back(&source, &dest) {
            Ok(final_path) => Ok(Ok(Restored::Moved(final_path))),
            Err(issue) => {
                if record.committed {
                    session.records[index].committed = true;
                    self.recorder.save(session)?;
                }
                Ok(Err(issue))
            }
        }
    }
}

/// Decides whether a record still needs its file moved back.
fn check_record(target: &Path, record: &MoveRecord) -> Result<Check, FileIssue> {
    let failed = |path: &Path, reason: String| FileIssue::failed(path.to_path_buf(), reason);

    let source = validate_within(&record.source_path, target)
        .map_err(|e| failed(&record.source_path, e.to_string()))?;

    match record.dest_path.symlink_metadata() {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(failed(
                &record.dest_path,
                "recorded location no longer holds a regular file".to_string(),
            ));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // Only an uncommitted record may describe a move that never happened
            return if !record.committed && source.symlink_metadata().is_ok() {
                Ok(Check::AlreadyInPlace)
            } else {
                Err(failed(
                    &record.dest_path,
                    "file not found at its recorded location".to_string(),
                ))
            };
        }
        Err(e) => return Err(failed(&record.dest_path, e.to_string())),
    }

    let dest = validate_within(&record.dest_path, target)
        .map_err(|e| failed(&record.dest_path, e.to_string()))?;
    Ok(Check::Ready { source, dest })
}

/// Moves a file back next to where it came from, under a new name if the
/// original spot is taken.
fn move_back(source: &Path, dest: &Path) -> Result<PathBuf, FileIssue> {
    let final_path = conflict::resolve(source);
    FileOrganizer::relocate(dest, &final_path).map_err(|e| {
        FileIssue::failed(dest.to_path_buf(), format!("failed to restore file: {e}"))
    })?;

    if final_path != source {
        info!(
            original = %source.display(),
            restored = %final_path.display(),
            "Original location was taken, restored under a new name"
        );
    }
    debug!(from = %dest.display(), to = %final_path.display(), "Restored file");
    Ok(final_path)
}

/// Removes folders the sort created, if nothing else has been put in them.
fn remove_empty_folders(target: &Path, session: &SortSession) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for folder in &session.created_folders {
        if validate_within(folder, target).is_err() {
            warn!(folder = %folder.display(), "Ignoring folder outside the target directory");
            continue;
        }
        match fs::remove_dir(folder) {
            Ok(()) => removed.push(folder.clone()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(folder = %folder.display(), error = %e, "Keeping folder"),
        }
    }
    removed
}
