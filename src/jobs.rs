//! Per-directory locking and background execution of sort and undo runs.
//!
//! A directory can only host one sort or undo at a time, across threads and
//! across processes. The lock is held by a [`DirectoryGuard`] for the whole
//! run, and the engines take the guard as a parameter so a run cannot start
//! without it.

use crate::error::{SortError, SortResult};
use crate::progress::{CancelToken, EngineEvent};
use crate::recorder::{MoveRecorder, SESSION_FILE_PREFIX, SortSession};
use crate::sort_engine::{SortEngine, SortPlan, SortRequest, SortSummary};
use crate::undo::{UndoEngine, UndoReport};
use crate::validation::validate_path;
use crossbeam_channel::{Receiver, unbounded};
use std::collections::HashSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Name of the lock file kept in each target directory. It shares the
/// session prefix so the sort engine never picks it up.
pub const LOCK_FILE_NAME: &str = ".foldersort_session.lock";

/// Set of directories with a run in progress.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLocks {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for `directory`, which should already be canonical.
    ///
    /// Fails with [`SortError::DirectoryBusy`] while another guard for the
    /// same directory is alive, in this process or any other.
    pub fn acquire(&self, directory: &Path) -> SortResult<DirectoryGuard> {
        let mut active = self.lock_set();
        if !active.insert(directory.to_path_buf()) {
            warn!(directory = %directory.display(), "Directory is busy");
            return Err(SortError::DirectoryBusy(directory.to_path_buf()));
        }

        let lock_file = match lock_directory(directory) {
            Ok(file) => file,
            Err(e) => {
                active.remove(directory);
                return Err(e);
            }
        };
        debug!(directory = %directory.display(), "Directory locked");
        Ok(DirectoryGuard {
            directory: directory.to_path_buf(),
            active: Arc::clone(&self.active),
            _lock_file: lock_file,
        })
    }

    pub fn is_locked(&self, directory: &Path) -> bool {
        self.lock_set().contains(directory)
    }

    // A panic while holding the set cannot leave it half-updated
    fn lock_set(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Takes an exclusive OS lock on the directory's lock file. The file is left
/// in place afterwards; removing it would let two processes lock different
/// inodes under the same name.
fn lock_directory(directory: &Path) -> SortResult<File> {
    debug_assert!(LOCK_FILE_NAME.starts_with(SESSION_FILE_PREFIX));
    let path = directory.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|source| SortError::LockFailed {
            path: path.clone(),
            source,
        })?;

    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => {
            warn!(directory = %directory.display(), "Directory is locked by another process");
            Err(SortError::DirectoryBusy(directory.to_path_buf()))
        }
        Err(TryLockError::Error(source)) => Err(SortError::LockFailed { path, source }),
    }
}

/// Exclusive hold on one directory. Released on drop.
#[derive(Debug)]
pub struct DirectoryGuard {
    directory: PathBuf,
    active: Arc<Mutex<HashSet<PathBuf>>>,
    // The OS lock is released when the file handle closes
    _lock_file: File,
}

impl DirectoryGuard {
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.directory);
        debug!(directory = %self.directory.display(), "Directory unlocked");
    }
}

/// A run executing on its own thread.
///
/// Events arrive on [`events`](Self::events) in the order the engine emits
/// them; the channel closes when the run ends.
pub struct JobHandle<T> {
    events: Receiver<EngineEvent>,
    cancel: CancelToken,
    worker: JoinHandle<SortResult<T>>,
}

impl<T: Send + 'static> JobHandle<T> {
    fn spawn<F>(cancel: CancelToken, job: F) -> Self
    where
        F: FnOnce(&mut dyn FnMut(EngineEvent), &CancelToken) -> SortResult<T> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let worker_cancel = cancel.clone();

        let worker = thread::spawn(move || {
            // The receiver may be gone if the caller stopped listening
            let mut send = |event: EngineEvent| {
                let _ = tx.send(event);
            };
            job(&mut send, &worker_cancel)
        });

        Self {
            events: rx,
            cancel,
            worker,
        }
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Asks the run to stop before its next file.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Blocks until the run ends and returns its result.
    pub fn wait(self) -> SortResult<T> {
        self.worker
            .join()
            .unwrap_or_else(|_| Err(SortError::WorkerPanicked))
    }
}

/// Entry point tying validation, locking and the engines together.
#[derive(Debug, Clone, Default)]
pub struct Organizer {
    locks: DirectoryLocks,
    recorder: MoveRecorder,
}

impl Organizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &DirectoryLocks {
        &self.locks
    }

    /// Sorts on the calling thread.
    pub fn sort(
        &self,
        request: &SortRequest,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<SortSummary> {
        let target = validate_path(&request.target_directory)?;
        let guard = self.locks.acquire(&target)?;
        SortEngine::new(self.recorder.clone()).run(&guard, request, on_event, cancel)
    }

    /// Undoes the last sort of `target` on the calling thread.
    pub fn undo(
        &self,
        target: &Path,
        on_event: &mut dyn FnMut(EngineEvent),
        cancel: &CancelToken,
    ) -> SortResult<UndoReport> {
        let target = validate_path(target)?;
        let guard = self.locks.acquire(&target)?;
        UndoEngine::new(self.recorder.clone()).run(&guard, on_event, cancel)
    }

    pub fn preview(&self, request: &SortRequest) -> SortResult<SortPlan> {
        SortEngine::new(self.recorder.clone()).preview(request)
    }

    /// The session an undo of `target` would replay, if any.
    pub fn pending_session(&self, target: &Path) -> SortResult<Option<SortSession>> {
        let target = validate_path(target)?;
        self.recorder.peek(&target)
    }

    /// Starts a sort on a worker thread.
    ///
    /// Validation and locking happen before this returns, so a busy or
    /// invalid directory is reported here rather than through the handle.
    pub fn spawn_sort(&self, request: SortRequest) -> SortResult<JobHandle<SortSummary>> {
        self.spawn_sort_with(request, CancelToken::new())
    }

    /// Like [`spawn_sort`](Self::spawn_sort), stopping when `cancel` fires.
    /// [`JobHandle::cancel`] sets the same token.
    pub fn spawn_sort_with(
        &self,
        request: SortRequest,
        cancel: CancelToken,
    ) -> SortResult<JobHandle<SortSummary>> {
        let target = validate_path(&request.target_directory)?;
        let guard = self.locks.acquire(&target)?;
        let engine = SortEngine::new(self.recorder.clone());

        Ok(JobHandle::spawn(cancel, move |on_event, cancel| {
            engine.run(&guard, &request, on_event, cancel)
        }))
    }

    /// Starts an undo on a worker thread.
    pub fn spawn_undo(&self, target: PathBuf) -> SortResult<JobHandle<UndoReport>> {
        self.spawn_undo_with(target, CancelToken::new())
    }

    pub fn spawn_undo_with(
        &self,
        target: PathBuf,
        cancel: CancelToken,
    ) -> SortResult<JobHandle<UndoReport>> {
        let target = validate_path(&target)?;
        let guard = self.locks.acquire(&target)?;
        let engine = UndoEngine::new(self.recorder.clone());

        Ok(JobHandle::spawn(cancel, move |on_event, cancel| {
            engine.run(&guard, on_event, cancel)
        }))
    }
}
