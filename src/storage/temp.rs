//! Scratch files for job inputs and outputs.
//!
//! Every path handed out here either ends up as the materialized file of a
//! history entry or gets reclaimed. Reclaiming is best effort: a failed delete
//! is logged and remembered so a later [`TempFileStore::sweep`] can retry it.
//!
//! Several processes may share one scratch root. Each store works in its own
//! session directory next to a lock file it keeps locked while open:
//!
//! ```text
//! <root>/fs-<pid>-<time>-<n>.lock
//! <root>/fs-<pid>-<time>-<n>/input/<seq>.<ext>
//! <root>/fs-<pid>-<time>-<n>/output/<seq>.<ext>
//! ```
//!
//! A session whose lock can be taken has no owner left and is swept on open.

use chrono::Utc;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use walkdir::WalkDir;

/// Prefix shared by every session this store creates.
const SESSION_PREFIX: &str = "fs-";
const LOCK_SUFFIX: &str = ".lock";
/// Lock files are created under this name and renamed once locked.
const LOCK_TMP_SUFFIX: &str = ".lock.tmp";

/// Distinguishes stores opened by one process within the same instant.
static OPENED: AtomicU64 = AtomicU64::new(0);

/// What a staged file is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Input,
    Output,
}

impl StageKind {
    const ALL: [StageKind; 2] = [StageKind::Input, StageKind::Output];

    fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Allocates and reclaims scratch files under one private session directory.
#[derive(Debug)]
pub struct TempFileStore {
    root: PathBuf,
    session: String,
    session_dir: PathBuf,
    lock_path: PathBuf,
    /// Held for the store's lifetime; other stores see the session as live.
    _lock: File,
    extension: String,
    next_seq: AtomicU64,
    deferred: Mutex<HashSet<PathBuf>>,
}

impl TempFileStore {
    /// Open a new session under `root`, creating it if needed.
    ///
    /// Sessions whose owning store is gone are swept right away; nothing from
    /// them can still be referenced since history is not persisted.
    pub fn open(root: impl Into<PathBuf>, extension: &str) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let session = format!(
            "{SESSION_PREFIX}{}-{}-{}",
            std::process::id(),
            Utc::now().format("%Y%m%d%H%M%S%6f"),
            OPENED.fetch_add(1, Ordering::Relaxed)
        );
        let (lock, lock_path) = lock_session(&root, &session)?;
        let session_dir = root.join(&session);
        for kind in StageKind::ALL {
            fs::create_dir_all(session_dir.join(kind.as_str()))?;
        }

        let store = Self {
            root,
            session,
            session_dir,
            lock_path,
            _lock: lock,
            extension: extension.trim_start_matches('.').to_lowercase(),
            next_seq: AtomicU64::new(0),
            deferred: Mutex::new(HashSet::new()),
        };
        tracing::debug!(session = %store.session, "Scratch session opened");

        let swept = store.sweep_orphans();
        if swept > 0 {
            tracing::info!(swept, root = %store.root.display(), "Removed abandoned scratch sessions");
        }
        Ok(store)
    }

    /// Shared scratch root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding this store's files
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Extension given to allocated files (without the dot)
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Hand out a fresh, empty file that no other allocation can alias.
    pub fn allocate(&self, kind: StageKind) -> io::Result<PathBuf> {
        let dir = self.session_dir.join(kind.as_str());
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let path = dir.join(format!("{seq}.{}", self.extension));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    tracing::trace!(path = %path.display(), "Allocated scratch file");
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Delete `path`. Never fails; a file that cannot be removed is remembered
    /// for the next sweep.
    pub fn reclaim(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => tracing::trace!(path = %path.display(), "Reclaimed scratch file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to reclaim scratch file");
                self.defer(path);
            }
        }
    }

    /// Remember `path` for removal by a later sweep.
    ///
    /// Used when something may still write the file after it was reclaimed
    /// (an engine call that timed out).
    pub fn defer(&self, path: &Path) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
    }

    /// Number of files waiting for a retry
    pub fn deferred_count(&self) -> usize {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Retry every deferred delete. Returns how many files are still pending.
    pub fn sweep(&self) -> usize {
        let mut deferred = self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
        deferred.retain(|path| match fs::remove_file(path) {
            Ok(()) => false,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "Scratch file still not removable");
                true
            }
        });
        if !deferred.is_empty() {
            tracing::warn!(pending = deferred.len(), "Scratch files still waiting for removal");
        }
        deferred.len()
    }

    /// Remove sessions under the shared root whose owner is gone.
    fn sweep_orphans(&self) -> usize {
        let mut removed = 0;

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SESSION_PREFIX) || name.ends_with(LOCK_TMP_SUFFIX) {
                continue;
            }

            let swept = if let Some(session) = name.strip_suffix(LOCK_SUFFIX) {
                session != self.session
                    && entry.file_type().is_file()
                    && sweep_locked_session(&self.root, session, entry.path())
            } else if entry.file_type().is_dir() && name != self.session {
                // Lock files are in place before their directory exists, so a
                // directory without one was left half-removed by a sweep.
                let lock = self.root.join(format!("{name}{LOCK_SUFFIX}"));
                !lock.exists() && remove_tree(entry.path())
            } else {
                false
            };
            if swept {
                removed += 1;
            }
        }

        removed
    }
}

impl Drop for TempFileStore {
    fn drop(&mut self) {
        if remove_tree(&self.session_dir) {
            if let Err(err) = fs::remove_file(&self.lock_path) {
                tracing::warn!(path = %self.lock_path.display(), error = %err, "Failed to remove session lock");
            }
        }
    }
}

/// Create and lock `<root>/<session>.lock`.
///
/// The file only appears under its final name once locked, so a sweep never
/// mistakes a session that is still starting up for an abandoned one.
fn lock_session(root: &Path, session: &str) -> io::Result<(File, PathBuf)> {
    let tmp = root.join(format!("{session}{LOCK_TMP_SUFFIX}"));
    let file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
    if let Err(err) = try_lock(&file) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    let path = root.join(format!("{session}{LOCK_SUFFIX}"));
    fs::rename(&tmp, &path)?;
    Ok((file, path))
}

fn try_lock(file: &File) -> io::Result<()> {
    match file.try_lock() {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "scratch session is locked",
        )),
        Err(TryLockError::Error(err)) => Err(err),
    }
}

/// Remove `session` if nobody holds its lock. Returns true if it was removed.
fn sweep_locked_session(root: &Path, session: &str, lock_path: &Path) -> bool {
    let lock = match OpenOptions::new().write(true).open(lock_path) {
        Ok(lock) => lock,
        // Another sweep got there first.
        Err(_) => return false,
    };
    match try_lock(&lock) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return false,
        Err(err) => {
            tracing::debug!(session, error = %err, "Cannot probe scratch session");
            return false;
        }
    }

    if !remove_tree(&root.join(session)) {
        return false;
    }
    match fs::remove_file(lock_path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!(path = %lock_path.display(), error = %err, "Failed to remove stale lock");
            false
        }
    }
}

/// `remove_dir_all`, treating a missing directory as removed.
fn remove_tree(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "Failed to remove scratch directory");
            false
        }
    }
}
