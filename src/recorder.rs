/// The move ledger: one persisted session per target directory.
///
/// A session lists every move of the most recent sort pass so that it can be
/// reversed, even after the process restarts. The ledger is written ahead of
/// each move, so a crash can leave a record for a move that never happened,
/// but never loses the record of a move that did.
use crate::error::{SortError, SortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the persisted session inside the target directory.
pub const SESSION_FILE_NAME: &str = ".foldersort_session.json";

/// Prefix shared by the session file and its temporary siblings. The sort
/// engine never touches entries starting with it.
pub const SESSION_FILE_PREFIX: &str = ".foldersort_session";

const SESSION_FORMAT_VERSION: u32 = 1;

/// A single file relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Where the file was before sorting.
    pub source_path: PathBuf,
    /// Where the sort put it.
    pub dest_path: PathBuf,
    /// Set once the file is known to be at `dest_path`. A record that was
    /// written but never committed may describe a move that did not happen.
    #[serde(default)]
    pub committed: bool,
}

impl MoveRecord {
    pub fn new(source_path: PathBuf, dest_path: PathBuf) -> Self {
        Self {
            source_path,
            dest_path,
            committed: false,
        }
    }
}

/// The ledger of one sort pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSession {
    #[serde(default = "default_version")]
    pub version: u32,
    pub target_directory: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Moves in execution order.
    #[serde(default)]
    pub records: Vec<MoveRecord>,
    /// Destination folders this pass created, removed again by a complete
    /// undo if they end up empty.
    #[serde(default)]
    pub created_folders: Vec<PathBuf>,
}

fn default_version() -> u32 {
    SESSION_FORMAT_VERSION
}

impl SortSession {
    pub fn new(target_directory: PathBuf) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            target_directory,
            started_at: Utc::now(),
            records: Vec::new(),
            created_folders: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reads and writes sessions under their target directories.
#[derive(Debug, Clone, Default)]
pub struct MoveRecorder;

impl MoveRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Returns the path of the session file for `target_directory`.
    pub fn session_path(target_directory: &Path) -> PathBuf {
        target_directory.join(SESSION_FILE_NAME)
    }

    /// Starts an empty session and persists it straight away, replacing any
    /// session left by an earlier sort that was never undone.
    pub fn begin_session(&self, target_directory: &Path) -> SortResult<SortSession> {
        let session = SortSession::new(target_directory.to_path_buf());
        if Self::session_path(target_directory).exists() {
            warn!(
                directory = %target_directory.display(),
                "Replacing previous sort session; it can no longer be undone"
            );
        }
        self.save(&session)?;
        Ok(session)
    }

    /// Adds `record` and persists the session. Call before performing the
    /// move the record describes.
    pub fn append(&self, session: &mut SortSession, record: MoveRecord) -> SortResult<()> {
        session.records.push(record);
        self.save(session)
    }

    /// Marks the most recent record as performed and persists the session.
    /// Call right after the move `append` announced has succeeded.
    pub fn commit_last(&self, session: &mut SortSession) -> SortResult<()> {
        if let Some(record) = session.records.last_mut() {
            record.committed = true;
            self.save(session)?;
        }
        Ok(())
    }

    /// Drops the most recent record again when its move did not happen.
    pub fn retract(&self, session: &mut SortSession, record: &MoveRecord) -> SortResult<()> {
        if session.records.last() == Some(record) {
            session.records.pop();
            self.save(session)?;
        }
        Ok(())
    }

    /// Notes a destination folder created by the current pass.
    pub fn note_created_folder(
        &self,
        session: &mut SortSession,
        folder: PathBuf,
    ) -> SortResult<()> {
        session.created_folders.push(folder);
        self.save(session)
    }

    /// Loads the session for `target_directory`.
    ///
    /// Fails with [`SortError::NoSessionToUndo`] when none exists.
    pub fn load(&self, target_directory: &Path) -> SortResult<SortSession> {
        self.peek(target_directory)?
            .ok_or_else(|| SortError::NoSessionToUndo(target_directory.to_path_buf()))
    }

    /// Reads the session afresh, if there is one. Suitable for read-only
    /// "can I undo?" checks while another run may be updating it.
    pub fn peek(&self, target_directory: &Path) -> SortResult<Option<SortSession>> {
        let path = Self::session_path(target_directory);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SortError::InvalidSessionFormat {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| SortError::InvalidSessionFormat {
                path,
                reason: format!("JSON parse error: {e}"),
            })
    }

    /// Deletes the persisted session after a successful undo.
    pub fn clear(&self, target_directory: &Path) -> SortResult<()> {
        let path = Self::session_path(target_directory);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Session cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SortError::SessionPersistenceFailed { path, source: e }),
        }
    }

    /// Writes `session` durably: temp file in the same directory, fsync,
    /// then an atomic rename over the previous version.
    pub fn save(&self, session: &SortSession) -> SortResult<()> {
        let path = Self::session_path(&session.target_directory);
        let failed = |source: io::Error| SortError::SessionPersistenceFailed {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| failed(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut temp = tempfile::Builder::new()
            .prefix(SESSION_FILE_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&session.target_directory)
            .map_err(failed)?;
        temp.write_all(json.as_bytes()).map_err(failed)?;
        temp.as_file().sync_all().map_err(failed)?;
        temp.persist(&path).map_err(|e| failed(e.error))?;

        debug!(
            path = %path.display(),
            records = session.records.len(),
            "Session persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(base: &Path, name: &str, folder: &str) -> MoveRecord {
        MoveRecord::new(base.join(name), base.join(folder).join(name))
    }

    #[test]
    fn test_begin_session_persists_immediately() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = MoveRecorder::new();

        let session = recorder.begin_session(temp_dir.path()).unwrap();
        assert!(session.is_empty());
        assert!(MoveRecorder::session_path(temp_dir.path()).exists());

        let loaded = recorder.load(temp_dir.path()).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_append_is_visible_to_fresh_reads() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut session = recorder.begin_session(base).unwrap();
        recorder.append(&mut session, record(base, "a.pdf", "Documents")).unwrap();
        recorder.append(&mut session, record(base, "b.png", "Images")).unwrap();

        let loaded = recorder.peek(base).unwrap().expect("Session should exist");
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1], record(base, "b.png", "Images"));
    }

    #[test]
    fn test_retract_only_removes_matching_tail() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut session = recorder.begin_session(base).unwrap();
        recorder.append(&mut session, record(base, "a.pdf", "Documents")).unwrap();
        recorder.append(&mut session, record(base, "b.png", "Images")).unwrap();

        recorder.retract(&mut session, &record(base, "a.pdf", "Documents")).unwrap();
        assert_eq!(session.records.len(), 2);

        recorder.retract(&mut session, &record(base, "b.png", "Images")).unwrap();
        assert_eq!(recorder.load(base).unwrap().records.len(), 1);
    }

    #[test]
    fn test_load_without_session() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = MoveRecorder::new();

        assert!(recorder.peek(temp_dir.path()).unwrap().is_none());
        assert!(matches!(
            recorder.load(temp_dir.path()),
            Err(SortError::NoSessionToUndo(_))
        ));
    }

    #[test]
    fn test_new_session_replaces_old_one() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut first = recorder.begin_session(base).unwrap();
        recorder.append(&mut first, record(base, "a.pdf", "Documents")).unwrap();

        recorder.begin_session(base).unwrap();
        assert!(recorder.load(base).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_session() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = MoveRecorder::new();

        recorder.begin_session(temp_dir.path()).unwrap();
        recorder.clear(temp_dir.path()).unwrap();
        assert!(recorder.peek(temp_dir.path()).unwrap().is_none());

        // Clearing twice is harmless
        recorder.clear(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_no_temporary_files_left_behind() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut session = recorder.begin_session(base).unwrap();
        recorder.append(&mut session, record(base, "a.pdf", "Documents")).unwrap();

        let names: Vec<_> = fs::read_dir(base)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![SESSION_FILE_NAME.to_string()]);
    }

    #[test]
    fn test_non_ascii_names_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut session = recorder.begin_session(base).unwrap();
        recorder
            .append(&mut session, record(base, "résumé 履歴書.pdf", "Documents"))
            .unwrap();

        let raw = fs::read_to_string(MoveRecorder::session_path(base)).unwrap();
        assert!(raw.contains("résumé 履歴書.pdf"));
        assert_eq!(recorder.load(base).unwrap(), session);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let json = serde_json::json!({
            "version": 7,
            "target_directory": base,
            "started_at": "2024-05-01T10:00:00Z",
            "records": [
                {
                    "source_path": base.join("a.pdf"),
                    "dest_path": base.join("Documents/a.pdf"),
                    "checksum": "abc"
                }
            ],
            "written_by": "a future version"
        });
        fs::write(MoveRecorder::session_path(base), json.to_string()).unwrap();

        let session = MoveRecorder::new().load(base).expect("Session should load");
        assert_eq!(session.version, 7);
        assert_eq!(session.records.len(), 1);
        assert!(session.created_folders.is_empty());
        assert!(!session.records[0].committed);
    }

    #[test]
    fn test_commit_marks_latest_record() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let recorder = MoveRecorder::new();

        let mut session = recorder.begin_session(base).unwrap();
        recorder.append(&mut session, record(base, "a.pdf", "Documents")).unwrap();
        recorder.append(&mut session, record(base, "b.png", "Images")).unwrap();
        recorder.commit_last(&mut session).unwrap();

        let loaded = recorder.load(base).unwrap();
        assert!(!loaded.records[0].committed);
        assert!(loaded.records[1].committed);
    }

    #[test]
    fn test_corrupt_session_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(MoveRecorder::session_path(temp_dir.path()), "{ not json").unwrap();

        assert!(matches!(
            MoveRecorder::new().load(temp_dir.path()),
            Err(SortError::InvalidSessionFormat { .. })
        ));
    }
}
