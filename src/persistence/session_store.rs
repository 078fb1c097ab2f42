//! File-backed session store.
//!
//! One pretty-printed JSON record per session, named `<name>.json`, in
//! either the active or the archived partition. Every write goes through a
//! temp file in the destination directory followed by `rename(2)`, so a
//! reader sees either the old record or the new one, never a torn write.
//! Moving between partitions is likewise a single rename of the record
//! file, which is the only thing listings look at.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::session::{validate_session_name, SessionState, SessionStatus};
use crate::{AppError, Result};

const RECORD_EXT: &str = "json";
const LOG_EXT: &str = "log";

/// Which directory partition a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Sessions visible to `ListSessions`.
    Active,
    /// Sessions visible to `ListArchivedSessions`.
    Archived,
}

/// Durable store of [`SessionState`] records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    active_dir: PathBuf,
    archived_dir: PathBuf,
    tombstone_dir: PathBuf,
}

impl SessionStore {
    /// Open the store described by `config`, creating its directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a directory cannot be created.
    pub fn open(config: &GlobalConfig) -> Result<Self> {
        Self::new(
            config.active_dir().to_path_buf(),
            config.archived_dir(),
            config.tombstone_dir(),
        )
    }

    /// Open a store over explicit directories, creating them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a directory cannot be created.
    pub fn new(active_dir: PathBuf, archived_dir: PathBuf, tombstone_dir: PathBuf) -> Result<Self> {
        for dir in [&active_dir, &archived_dir, &tombstone_dir] {
            create_private_dir(dir)?;
        }
        Ok(Self {
            active_dir,
            archived_dir,
            tombstone_dir,
        })
    }

    /// Directory of the active partition.
    #[must_use]
    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    /// Directory of the archived partition.
    #[must_use]
    pub fn archived_dir(&self) -> &Path {
        &self.archived_dir
    }

    /// Path of a session's record in the given partition.
    #[must_use]
    pub fn record_path(&self, partition: Partition, name: &str) -> PathBuf {
        self.dir(partition).join(format!("{name}.{RECORD_EXT}"))
    }

    /// Path of a session's log file in the given partition.
    #[must_use]
    pub fn log_path(&self, partition: Partition, name: &str) -> PathBuf {
        self.dir(partition).join(format!("{name}.{LOG_EXT}"))
    }

    /// Persist `state` into the active partition, replacing any prior record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName`, `AppError::Store` on encode failure,
    /// or `AppError::Io` if the write or rename fails.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        self.write_record(Partition::Active, state)
    }

    /// Load a record from the active partition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no such active session.
    pub fn load(&self, name: &str) -> Result<SessionState> {
        self.read_named(Partition::Active, name)
    }

    /// Load a record from the archived partition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no such archived session.
    pub fn load_archived(&self, name: &str) -> Result<SessionState> {
        self.read_named(Partition::Archived, name)
    }

    /// Whether an active record exists for `name`.
    #[must_use]
    pub fn exists_active(&self, name: &str) -> bool {
        self.record_path(Partition::Active, name).is_file()
    }

    /// Whether an archived record exists for `name`.
    #[must_use]
    pub fn exists_archived(&self, name: &str) -> bool {
        self.record_path(Partition::Archived, name).is_file()
    }

    /// Whether `name` was retired by a removal or rename.
    #[must_use]
    pub fn is_retired(&self, name: &str) -> bool {
        self.tombstone_dir.join(name).exists()
    }

    /// Whether `name` is taken in any partition or retired.
    #[must_use]
    pub fn name_in_use(&self, name: &str) -> bool {
        self.exists_active(name) || self.exists_archived(name) || self.is_retired(name)
    }

    /// Active sessions, oldest first. Unreadable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be read.
    pub fn list_active(&self) -> Result<Vec<SessionState>> {
        self.list(Partition::Active)
    }

    /// Archived sessions, oldest first. Unreadable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be read.
    pub fn list_archived(&self) -> Result<Vec<SessionState>> {
        self.list(Partition::Archived)
    }

    /// Move a terminal session into the archived partition.
    ///
    /// The record is first rewritten in place as `Archived`, then its log
    /// and finally the record itself are renamed across. A record already
    /// marked `Archived` (left by an interrupted earlier attempt) is simply
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not active,
    /// `AppError::Conflict` if it is not terminal or an archived record of
    /// the same name exists, or `AppError::Io` if a move fails.
    pub fn archive(&self, name: &str) -> Result<SessionState> {
        let mut state = self.load(name)?;
        if self.exists_archived(name) {
            return Err(AppError::Conflict(format!(
                "an archived session named '{name}' already exists"
            )));
        }

        // An interrupted attempt may already have pointed the record at the
        // archived log; the file itself is still next to the active record.
        let original_log = if state.status == SessionStatus::Archived {
            self.log_path(Partition::Active, name)
        } else {
            state.transition_to(SessionStatus::Archived)?;
            state.log_file.clone()
        };
        let archived_log = self.log_path(Partition::Archived, name);
        state.log_file = archived_log.clone();
        self.save(&state)?;

        move_log(&original_log, &archived_log)?;

        if let Err(err) = fs::rename(
            self.record_path(Partition::Active, name),
            self.record_path(Partition::Archived, name),
        ) {
            // Put the log back; the record stays active and marked Archived,
            // so the next reconciliation pass retries the move.
            let _ = move_log(&archived_log, &original_log);
            return Err(AppError::Io(format!(
                "failed to move session '{name}' to archive: {err}"
            )));
        }

        info!(session = name, "session archived");
        Ok(state)
    }

    /// Move an archived session back into the active partition, restoring
    /// the status it had before archival.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not archived,
    /// `AppError::Conflict` if an active session of the same name exists,
    /// or `AppError::Io` if a move fails.
    pub fn unarchive(&self, name: &str) -> Result<SessionState> {
        let mut state = self.load_archived(name)?;
        if self.exists_active(name) {
            return Err(AppError::Conflict(format!(
                "an active session named '{name}' already exists"
            )));
        }

        let archived_log = state.log_file.clone();
        let active_log = self.log_path(Partition::Active, name);
        move_log(&archived_log, &active_log)?;

        // The record travels unchanged; until the rewrite below lands it is
        // an `Archived` record in the active partition, which reconciliation
        // sends back to the archive with `archived_from` intact.
        if let Err(err) = fs::rename(
            self.record_path(Partition::Archived, name),
            self.record_path(Partition::Active, name),
        ) {
            let _ = move_log(&active_log, &archived_log);
            return Err(AppError::Io(format!(
                "failed to move session '{name}' out of archive: {err}"
            )));
        }

        state.status = state.archived_from.take().unwrap_or(SessionStatus::Stopped);
        state.log_file = active_log;
        self.save(&state)?;

        info!(session = name, status = %state.status, "session unarchived");
        Ok(state)
    }

    /// Rename an active session, carrying its log along, and retire the old name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `old` is not active,
    /// `AppError::Conflict` if `new` is in use or retired, or `AppError::Io`.
    pub fn rename(&self, old: &str, new: &str) -> Result<SessionState> {
        validate_session_name(new)?;
        let mut state = self.load(old)?;
        if self.name_in_use(new) {
            return Err(AppError::Conflict(format!(
                "a session named '{new}' already exists"
            )));
        }

        let old_log = state.log_file.clone();
        let new_log = self.log_path(Partition::Active, new);
        move_log(&old_log, &new_log)?;

        if let Err(err) = fs::rename(
            self.record_path(Partition::Active, old),
            self.record_path(Partition::Active, new),
        ) {
            let _ = move_log(&new_log, &old_log);
            return Err(AppError::Io(format!(
                "failed to rename session '{old}' to '{new}': {err}"
            )));
        }

        state.name = new.to_owned();
        state.log_file = new_log;
        self.save(&state)?;
        self.retire_name(old)?;

        info!(from = old, to = new, "session renamed");
        Ok(state)
    }

    /// Delete an active session's record and log, and retire its name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not active, or
    /// `AppError::Io` if deletion fails.
    pub fn remove(&self, name: &str) -> Result<()> {
        let state = self.load(name)?;

        let record = self.record_path(Partition::Active, name);
        fs::remove_file(&record).map_err(|err| {
            AppError::Io(format!(
                "failed to remove session record {}: {err}",
                record.display()
            ))
        })?;

        if let Err(err) = fs::remove_file(&state.log_file) {
            if err.kind() != io::ErrorKind::NotFound {
                return Err(AppError::Io(format!(
                    "failed to remove session log {}: {err}",
                    state.log_file.display()
                )));
            }
        }

        self.retire_name(name)?;
        info!(session = name, "session removed");
        Ok(())
    }

    /// Record that `name` may never be used again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the marker cannot be written.
    pub fn retire_name(&self, name: &str) -> Result<()> {
        validate_session_name(name)?;
        let marker = self.tombstone_dir.join(name);
        fs::write(&marker, b"").map_err(|err| {
            AppError::Io(format!(
                "failed to write tombstone {}: {err}",
                marker.display()
            ))
        })
    }

    fn dir(&self, partition: Partition) -> &Path {
        match partition {
            Partition::Active => &self.active_dir,
            Partition::Archived => &self.archived_dir,
        }
    }

    fn write_record(&self, partition: Partition, state: &SessionState) -> Result<()> {
        validate_session_name(&state.name)?;
        let dir = self.dir(partition);
        let target = self.record_path(partition, &state.name);
        let bytes = serde_json::to_vec_pretty(state)?;

        // Dot-prefixed, non-.json temp names are invisible to listings.
        let mut tmp = Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|err| AppError::Io(format!("failed to create temporary record: {err}")))?;

        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| AppError::Io(format!("failed to write temporary record: {err}")))?;

        tmp.persist(&target).map_err(|err| {
            AppError::Io(format!(
                "failed to persist session record to {}: {err}",
                target.display()
            ))
        })?;

        debug!(session = %state.name, status = %state.status, path = %target.display(), "session record saved");
        Ok(())
    }

    fn read_named(&self, partition: Partition, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let path = self.record_path(partition, name);
        match read_record(&path) {
            Err(AppError::NotFound(_)) => Err(AppError::NotFound(format!(
                "session '{name}' not found"
            ))),
            other => other,
        }
    }

    fn list(&self, partition: Partition) -> Result<Vec<SessionState>> {
        let dir = self.dir(partition);
        let entries = fs::read_dir(dir).map_err(|err| {
            AppError::Io(format!(
                "failed to read sessions directory {}: {err}",
                dir.display()
            ))
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != RECORD_EXT) {
                continue;
            }

            match read_record(&path) {
                Ok(state) => sessions.push(state),
                // Raced with a rename or removal.
                Err(AppError::NotFound(_)) => {}
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable session record"),
            }
        }

        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.name.cmp(&b.name)));
        Ok(sessions)
    }
}

/// Read and decode one record. The file stem is authoritative for the name.
fn read_record(path: &Path) -> Result<SessionState> {
    let data = fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::NotFound(format!("{} not found", path.display()))
        } else {
            AppError::Io(format!("failed to read {}: {err}", path.display()))
        }
    })?;

    let mut state: SessionState = serde_json::from_slice(&data)
        .map_err(|err| AppError::Store(format!("failed to parse {}: {err}", path.display())))?;

    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        if state.name != stem {
            debug!(recorded = %state.name, stem, "record name differs from file name; using file name");
            state.name = stem.to_owned();
        }
    }

    Ok(state)
}

/// Rename a log file, treating a missing source as nothing to move.
fn move_log(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "failed to move log {} to {}: {err}",
            from.display(),
            to.display()
        ))),
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|err| {
        AppError::Io(format!(
            "failed to create sessions directory {}: {err}",
            dir.display()
        ))
    })
}
