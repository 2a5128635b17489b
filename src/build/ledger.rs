//! Build status ledger shared by every worker process on the host.
//!
//! The ledger is a pretty-printed JSON object mapping build directory to status. All
//! access goes through [`BuildLedger::lock`], which holds an advisory lock on a sibling
//! `.lock` file for the whole read-modify-write.

use crate::error::BuildError;
use fs4::FileExt;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const LEDGER_FILE_NAME: &str = "hiltestor_builder.json";
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle of one build directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    #[default]
    NotDone,
    InProgress,
    Done,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Done | BuildStatus::Failed)
    }

    /// Allowed forward transitions. Terminal states only leave through [`BuildLedger::clear`].
    pub fn can_become(&self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::NotDone, BuildStatus::InProgress)
                | (BuildStatus::InProgress, BuildStatus::Done)
                | (BuildStatus::InProgress, BuildStatus::Failed)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::NotDone => "NOT_DONE",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Done => "DONE",
            BuildStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

pub type LedgerRecords = BTreeMap<String, BuildStatus>;

/// Location and locking policy of the ledger.
#[derive(Debug, Clone)]
pub struct BuildLedger {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl BuildLedger {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            lock_timeout,
        }
    }

    /// Location shared by every worker writing into `outdir`.
    ///
    /// Wiping the output directory also wipes the ledger.
    pub fn default_path(outdir: &Path) -> PathBuf {
        outdir.join(LEDGER_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the cross-process lock and loads the current records.
    ///
    /// Fails with [`BuildError::LockTimeout`] instead of blocking forever on a stuck lock.
    pub fn lock(&self) -> Result<LockedLedger<'_>, BuildError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|error| self.io_error(parent, error))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|error| self.io_error(&self.lock_path, error))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => return Err(self.io_error(&self.lock_path, error)),
            }
            if start.elapsed() >= self.lock_timeout {
                return Err(BuildError::LockTimeout {
                    path: self.lock_path.clone(),
                    timeout: self.lock_timeout,
                });
            }
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
        trace!("Locked build ledger {}", self.lock_path.display());

        let records = self.read_records()?;
        Ok(LockedLedger {
            ledger: self,
            _lock: file,
            records,
            dirty: false,
        })
    }

    /// Convenience wrapper: status of one key under the lock.
    pub fn status(&self, key: &str) -> Result<BuildStatus, BuildError> {
        Ok(self.lock()?.get(key))
    }

    /// Snapshot of every record.
    pub fn records(&self) -> Result<LedgerRecords, BuildError> {
        Ok(self.lock()?.records.clone())
    }

    /// Forgets a key, e.g. after its output directory has been wiped.
    pub fn clear(&self, key: &str) -> Result<(), BuildError> {
        let mut locked = self.lock()?;
        locked.forget(key);
        locked.commit()
    }

    /// Forgets every key.
    pub fn clear_all(&self) -> Result<(), BuildError> {
        let mut locked = self.lock()?;
        if !locked.records.is_empty() {
            debug!("Clearing {} ledger entries", locked.records.len());
            locked.records.clear();
            locked.dirty = true;
        }
        locked.commit()
    }

    fn read_records(&self) -> Result<LedgerRecords, BuildError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(LedgerRecords::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|error| BuildError::LedgerFormat {
                path: self.path.clone(),
                error,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LedgerRecords::new()),
            Err(error) => Err(self.io_error(&self.path, error)),
        }
    }

    fn write_records(&self, records: &LedgerRecords) -> Result<(), BuildError> {
        let json = serde_json::to_string_pretty(records).map_err(|error| BuildError::LedgerFormat {
            path: self.path.clone(),
            error,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|error| self.io_error(&tmp, error))?;
        fs::rename(&tmp, &self.path).map_err(|error| self.io_error(&self.path, error))
    }

    fn io_error(&self, path: &Path, error: io::Error) -> BuildError {
        BuildError::LedgerIo {
            path: path.to_path_buf(),
            error,
        }
    }
}

/// Ledger records loaded while the lock is held. The lock is released on drop.
pub struct LockedLedger<'a> {
    ledger: &'a BuildLedger,
    _lock: File,
    records: LedgerRecords,
    dirty: bool,
}

impl LockedLedger<'_> {
    pub fn get(&self, key: &str) -> BuildStatus {
        self.records.get(key).copied().unwrap_or_default()
    }

    /// Drops `key` back to NOT_DONE.
    pub fn forget(&mut self, key: &str) {
        if self.records.remove(key).is_some() {
            debug!("Cleared ledger entry for {key}");
            self.dirty = true;
        }
    }

    /// Moves `key` forward; returns false and changes nothing for a disallowed transition.
    pub fn transition(&mut self, key: &str, next: BuildStatus) -> bool {
        let current = self.get(key);
        if !current.can_become(next) {
            debug!("Refusing ledger transition {current} -> {next} for {key}");
            return false;
        }
        debug!("Ledger {key}: {current} -> {next}");
        self.records.insert(key.to_string(), next);
        self.dirty = true;
        true
    }

    /// Writes pending changes and releases the lock.
    pub fn commit(self) -> Result<(), BuildError> {
        if self.dirty {
            self.ledger.write_records(&self.records)?;
        }
        Ok(())
    }
}
