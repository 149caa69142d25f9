//! A full sort pass over one directory.
//!
//! Files are enumerated, classified and moved one at a time. Each move is
//! written to the session ledger before it happens, cancellation is checked
//! before every file, and a file that cannot be moved is reported without
//! stopping the pass.

use crate::classifier::{ExtensionMap, classify};
use crate::config::CompiledFilters;
use crate::conflict;
use crate::error::{SortError, SortResult};
use crate::file_organizer::{FileOrganizer, FolderStatus};
use crate::jobs::DirectoryGuard;
use crate::progress::{CancelToken, EngineEvent, FileIssue, IssueKind, Progress, RunState};
use crate::recorder::{MoveRecord, MoveRecorder, SortSession};
use crate::validation::{validate_folder_name, validate_path};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Inputs of one sort pass.
#[derive(Debug, Clone)]
pub struct SortRequest {
    pub target_directory: PathBuf,
    pub extension_map: ExtensionMap,
    pub default_folder: String,
    pub filters: CompiledFilters,
}

impl SortRequest {
    /// A request that sorts every regular file in `target_directory`.
    pub fn new(
        target_directory: impl Into<PathBuf>,
        extension_map: ExtensionMap,
        default_folder: impl Into<String>,
    ) -> Self {
        Self {
            target_directory: target_directory.into(),
            extension_map,
            default_folder: default_folder.into(),
            filters: CompiledFilters::allow_all(),
        }
    }

    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Result of a sort pass that was not stopped by a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSummary {
    /// `Completed` or `Cancelled`.
    pub state: RunState,
    /// Files found by enumeration.
    pub total: usize,
    pub moved: usize,
    pub moved_by_folder: BTreeMap<String, usize>,
    pub skipped: Vec<FileIssue>,
    pub failed: Vec<FileIssue>,
}

impl SortSummary {
    fn new(total: usize) -> Self {
        Self {
            state: RunState::Moving,
            total,
            moved: 0,
            moved_by_folder: BTreeMap::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }

    /// True when every enumerated file was moved.
    pub fn is_complete_success(&self) -> bool {
        self.state == RunState::Completed && self.moved == self.total
    }
}

/// One file of a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub folder: String,
}

/// What a sort would do, computed without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPlan {
    pub target_directory: PathBuf,
    pub moves: Vec<PlannedMove>,
    pub skipped: Vec<FileIssue>,
}

impl SortPlan {
    pub fn folder_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for planned in &self.moves {
            *counts.entry(planned.folder.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Outcome of a single file inside a pass.
enum FileOutcome {
    Moved { folder: String },
    Issue(FileIssue),
}

#[derive(Debug, Clone, Default)]
pub struct SortEngine {
    recorder: MoveRecorder,
}

impl SortEngine {
    pub fn new(recorder: MoveRecorder) -> Self {
        Self { recorder }
    }

    /// Classifies the files of `request.target_directory` without moving
    /// anything.
    pub fn preview(&self, request: &SortRequest) -> SortResult<SortPlan> {
        let target = validate_path(&request.target_directory)?;
        let files = enumerate_files(&target, &request.filters)?;

        let mut plan = SortPlan {
            target_directory: target,
            moves: Vec::new(),
            skipped: Vec::new(),
        };
        for source in files {
            let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
                plan.skipped
                    .push(FileIssue::skipped(source, "file name is not valid UTF-8"));
                continue;
            };
            let folder = classify(file_name, &request.extension_map, &request.default_folder);
            match validate_folder_name(folder) {
                Ok(()) => {
                    let folder = folder.to_string();
                    plan.moves.push(PlannedMove { source, folder });
                }
                Err(e) => plan.skipped.push(FileIssue::skipped(source, e.to_string())),
            }
        }
        Ok(plan)
    }

    /// Runs a sort pass on the directory held by `guard`.
    ///
    /// Returns an error only when the pass cannot start or the ledger cannot
    /// be written; per-file problems end up in the summary.
    pub fn run(
        &self,
        guard: &DirectoryGuard,
        request: &SortRequest,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<SortSummary> {
        let result = self.run_pass(guard.directory(), request, on_event, cancel);
        match &result {
            Ok(summary) => on_event(EngineEvent::State(summary.state)),
            Err(e) => {
                warn!(directory = %guard.directory().display(), error = %e, "Sort failed");
                on_event(EngineEvent::State(RunState::Failed));
            }
        }
        result
    }

    fn run_pass(
        &self,
        target: &Path,
        request: &SortRequest,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<SortSummary> {
        validate_folder_name(&request.default_folder)?;

        on_event(EngineEvent::State(RunState::Scanning));
        if cancel.is_cancelled() {
            info!(directory = %target.display(), "Sort cancelled before scanning");
            let mut summary = SortSummary::new(0);
            summary.state = RunState::Cancelled;
            return Ok(summary);
        }

        let files = enumerate_files(target, &request.filters)?;
        let total = files.len();
        info!(directory = %target.display(), files = total, "Starting sort");

        let mut session = self.recorder.begin_session(target)?;
        let mut summary = SortSummary::new(total);
        on_event(EngineEvent::State(RunState::Moving));

        for (index, source) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(moved = summary.moved, remaining = total - index, "Sort cancelled");
                summary.state = RunState::Cancelled;
                return Ok(summary);
            }

            match self.sort_file(target, source, request, &mut session)? {
                FileOutcome::Moved { folder } => {
                    summary.moved += 1;
                    *summary.moved_by_folder.entry(folder).or_insert(0) += 1;
                }
                FileOutcome::Issue(issue) => {
                    warn!(path = %issue.path.display(), reason = %issue.reason, "File not sorted");
                    on_event(EngineEvent::Issue(issue.clone()));
                    match issue.kind {
                        IssueKind::Skipped => summary.skipped.push(issue),
                        IssueKind::MoveFailed => summary.failed.push(issue),
                    }
                }
            }

            on_event(EngineEvent::Progress(Progress {
                processed_count: index + 1,
                total_count: total,
                current_filename: display_name(source),
            }));
        }

        summary.state = RunState::Completed;
        info!(
            moved = summary.moved,
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Sort complete"
        );
        Ok(summary)
    }

    /// Classifies and moves one file. The outer `Err` is reserved for ledger
    /// failures, which end the pass.
    fn sort_file(
        &self,
        target: &Path,
        source: &Path,
        request: &SortRequest,
        session: &mut SortSession,
    ) -> SortResult<FileOutcome> {
        let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
            return Ok(FileOutcome::Issue(FileIssue::skipped(
                source.to_path_buf(),
                "file name is not valid UTF-8 and cannot be recorded",
            )));
        };

        let folder_name = classify(file_name, &request.extension_map, &request.default_folder);
        if let Err(e) = validate_folder_name(folder_name) {
            return Ok(FileOutcome::Issue(FileIssue::skipped(
                source.to_path_buf(),
                e.to_string(),
            )));
        }

        if let Err(e) = source.symlink_metadata() {
            return Ok(FileOutcome::Issue(FileIssue::skipped(
                source.to_path_buf(),
                format!("file is no longer accessible: {e}"),
            )));
        }

        let folder = target.join(folder_name);
        match FileOrganizer::ensure_folder(&folder) {
            Ok(FolderStatus::Created) => {
                self.recorder.note_created_folder(session, folder.clone())?
            }
            Ok(FolderStatus::Existing) => {}
            Err(e) => {
                return Ok(FileOutcome::Issue(FileIssue::failed(
                    source.to_path_buf(),
                    format!("cannot create folder '{folder_name}': {e}"),
                )));
            }
        }

        let destination = conflict::resolve(&folder.join(file_name));
        let record = MoveRecord::new(source.to_path_buf(), destination.clone());
        self.recorder.append(session, record.clone())?;

        match FileOrganizer::relocate(source, &destination) {
            Ok(method) => {
                self.recorder.commit_last(session)?;
                debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    ?method,
                    "Moved file"
                );
                Ok(FileOutcome::Moved {
                    folder: folder_name.to_string(),
                })
            }
            Err(e) => {
                self.recorder.retract(session, &record)?;
                let issue = if e.kind() == ErrorKind::NotFound {
                    FileIssue::skipped(source.to_path_buf(), "file disappeared before it was moved")
                } else {
                    FileIssue::failed(
                        source.to_path_buf(),
                        format!("failed to move to {}: {e}", destination.display()),
                    )
                };
                Ok(FileOutcome::Issue(issue))
            }
        }
    }
}

/// Direct-child regular files of `target` that pass `filters`, by name.
fn enumerate_files(target: &Path, filters: &CompiledFilters) -> SortResult<Vec<PathBuf>> {
    let entries = fs::read_dir(target).map_err(|e| SortError::Enumeration {
        path: target.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        if let Ok(file_type) = entry.file_type()
            && file_type.is_file()
            && filters.should_include(Path::new(&entry.file_name()))
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::DirectoryLocks;
    use tempfile::TempDir;

    fn request(base: &Path) -> SortRequest {
        let mut map = ExtensionMap::new();
        map.insert("pdf", "Documents").unwrap();
        map.insert("png", "Images").unwrap();
        SortRequest::new(base, map, "Other")
    }

    fn run(
        base: &Path,
        request: &SortRequest,
        cancel: &CancelToken,
    ) -> (SortResult<SortSummary>, Vec<EngineEvent>) {
        let locks = DirectoryLocks::new();
        let guard = locks
            .acquire(&validate_path(base).unwrap())
            .expect("Lock should be free");
        let mut events = Vec::new();
        let result = SortEngine::default().run(&guard, request, &mut |e| events.push(e), cancel);
        (result, events)
    }

    #[test]
    fn test_sorts_files_into_folders() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "pdf").unwrap();
        fs::write(base.join("b.PNG"), "png").unwrap();
        fs::write(base.join("README"), "text").unwrap();

        let (result, _) = run(base, &request(base), &CancelToken::new());
        let summary = result.expect("Sort should succeed");

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.moved, 3);
        assert!(summary.is_complete_success());
        assert!(base.join("Documents/a.pdf").exists());
        assert!(base.join("Images/b.PNG").exists());
        assert!(base.join("Other/README").exists());
        assert_eq!(summary.moved_by_folder.get("Documents"), Some(&1));
    }

    #[test]
    fn test_subdirectories_are_left_alone() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::create_dir(base.join("projects")).unwrap();
        fs::write(base.join("projects/inner.pdf"), "pdf").unwrap();

        let (result, _) = run(base, &request(base), &CancelToken::new());
        assert_eq!(result.unwrap().total, 0);
        assert!(base.join("projects/inner.pdf").exists());
        assert!(!base.join("Documents").exists());
    }

    #[test]
    fn test_records_every_move_and_created_folder() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::create_dir(base.join("Documents")).unwrap();
        fs::write(base.join("a.pdf"), "pdf").unwrap();
        fs::write(base.join("b.png"), "png").unwrap();

        run(base, &request(base), &CancelToken::new()).0.unwrap();

        let session = MoveRecorder::new().load(base).unwrap();
        let canonical = validate_path(base).unwrap();
        assert_eq!(session.records.len(), 2);
        assert_eq!(session.records[0].source_path, canonical.join("a.pdf"));
        assert_eq!(session.records[0].dest_path, canonical.join("Documents/a.pdf"));
        assert!(session.records.iter().all(|r| r.committed));
        assert_eq!(session.created_folders, vec![canonical.join("Images")]);
    }

    #[test]
    fn test_unwritable_session_stops_the_pass() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "pdf").unwrap();
        let session_path = MoveRecorder::session_path(base);

        // Once moving starts, a directory takes the session file's place
        let locks = DirectoryLocks::new();
        let guard = locks.acquire(&validate_path(base).unwrap()).unwrap();
        let mut states = Vec::new();
        let result = SortEngine::default().run(
            &guard,
            &request(base),
            &mut |event| {
                if let EngineEvent::State(state) = event {
                    if state == RunState::Moving {
                        fs::remove_file(&session_path).unwrap();
                        fs::create_dir(&session_path).unwrap();
                    }
                    states.push(state);
                }
            },
            &CancelToken::new(),
        );

        assert!(matches!(result, Err(SortError::SessionPersistenceFailed { .. })));
        assert_eq!(
            states,
            vec![RunState::Scanning, RunState::Moving, RunState::Failed]
        );
        assert!(base.join("a.pdf").exists());
        assert!(!base.join("Documents/a.pdf").exists());
    }

    #[test]
    fn test_conflicts_get_numbered_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::create_dir(base.join("Documents")).unwrap();
        fs::write(base.join("Documents/report.pdf"), "old").unwrap();
        fs::write(base.join("report.pdf"), "new").unwrap();

        run(base, &request(base), &CancelToken::new()).0.unwrap();

        assert_eq!(fs::read_to_string(base.join("Documents/report.pdf")).unwrap(), "old");
        assert_eq!(
            fs::read_to_string(base.join("Documents/report (1).pdf")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_emits_progress_for_every_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "pdf").unwrap();
        fs::write(base.join("b.pdf"), "pdf").unwrap();

        let (_, events) = run(base, &request(base), &CancelToken::new());
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].processed_count, 1);
        assert_eq!(progress[1].current_filename, "b.pdf");
        assert_eq!(progress[1].total_count, 2);
        assert_eq!(events.first(), Some(&EngineEvent::State(RunState::Scanning)));
        assert_eq!(events.last(), Some(&EngineEvent::State(RunState::Completed)));
    }

    #[test]
    fn test_cancel_before_start_touches_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "pdf").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = run(base, &request(base), &cancel).0.unwrap();

        assert!(summary.was_cancelled());
        assert!(base.join("a.pdf").exists());
        assert!(MoveRecorder::new().peek(base).unwrap().is_none());
    }

    #[test]
    fn test_invalid_default_folder_fails_before_moving() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.txt"), "txt").unwrap();

        let bad = SortRequest::new(base, ExtensionMap::new(), "a/b");
        let (result, events) = run(base, &bad, &CancelToken::new());

        assert!(matches!(result, Err(SortError::InvalidFolderName { .. })));
        assert_eq!(events.last(), Some(&EngineEvent::State(RunState::Failed)));
        assert!(base.join("a.txt").exists());
    }

    #[test]
    fn test_file_in_place_of_folder_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("b.png"), "png").unwrap();
        fs::write(base.join("zz"), "blocks the folder name").unwrap();

        let mut map = ExtensionMap::new();
        map.insert("png", "zz").unwrap();
        let request = SortRequest::new(base, map, "Other");
        let (result, events) = run(base, &request, &CancelToken::new());
        let summary = result.expect("A single bad file must not fail the pass");

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.moved, 1);
        assert!(base.join("b.png").exists());
        assert!(base.join("Other/zz").exists());
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Issue(_))));
        assert_eq!(MoveRecorder::new().load(base).unwrap().records.len(), 1);
    }

    #[test]
    fn test_preview_does_not_move() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "pdf").unwrap();
        fs::write(base.join("b.pdf"), "pdf").unwrap();
        fs::write(base.join("c.zip"), "zip").unwrap();

        let plan = SortEngine::default().preview(&request(base)).unwrap();
        assert_eq!(plan.moves.len(), 3);
        assert_eq!(plan.folder_counts().get("Documents"), Some(&2));
        assert_eq!(plan.folder_counts().get("Other"), Some(&1));
        assert!(base.join("a.pdf").exists());
        assert!(!base.join("Documents").exists());
    }

    #[test]
    fn test_filters_exclude_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join(".hidden.pdf"), "pdf").unwrap();
        fs::write(base.join("a.pdf"), "pdf").unwrap();

        let filters = CompiledFilters::new(&Default::default()).unwrap();
        let req = request(base).with_filters(filters);
        let summary = run(base, &req, &CancelToken::new()).0.unwrap();

        assert_eq!(summary.total, 1);
        assert!(base.join(".hidden.pdf").exists());
    }
}
