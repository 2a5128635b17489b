//! Build de-duplication across parallel workers.
//!
//! Every build directory moves through `NOT_DONE -> IN_PROGRESS -> {DONE, FAILED}` in the
//! shared ledger. The worker that performs the `NOT_DONE -> IN_PROGRESS` step under the
//! ledger lock is the only one that runs the build tool; every other worker polls until
//! the entry reaches a terminal state. `FAILED` is sticky until the entry is cleared.
//! A `DONE` entry whose build directory no longer exists is stale and is claimed again.

pub mod args;
pub mod builder;
pub mod ledger;

pub use builder::{BuildRequest, Builder, WestBuilder, detect_overflow};
pub use ledger::{BuildLedger, BuildStatus};

use crate::error::BuildError;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What a successful call to [`BuildCoordinator::build`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// This worker ran the build tool.
    Built,
    /// Another worker built it, now or earlier.
    AlreadyBuilt,
    /// The image did not fit; reported as a skip because overflow is advisory.
    Overflow(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub overflow_as_errors: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            overflow_as_errors: false,
        }
    }
}

/// Runs each build at most once no matter how many workers ask for it.
#[derive(Clone)]
pub struct BuildCoordinator {
    ledger: BuildLedger,
    builder: Arc<dyn Builder>,
    options: CoordinatorOptions,
}

impl BuildCoordinator {
    pub fn new(ledger: BuildLedger, builder: Arc<dyn Builder>, options: CoordinatorOptions) -> Self {
        Self {
            ledger,
            builder,
            options,
        }
    }

    pub fn ledger(&self) -> &BuildLedger {
        &self.ledger
    }

    pub fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        let key = request.key();

        loop {
            // compare-and-set under the lock; the lock is released before building
            let claimed = {
                let mut locked = self.ledger.lock()?;
                match locked.get(&key) {
                    BuildStatus::NotDone => {
                        locked.transition(&key, BuildStatus::InProgress);
                        locked.commit()?;
                        true
                    }
                    BuildStatus::InProgress => false,
                    BuildStatus::Done if !request.build_dir.exists() => {
                        warn!("{key} is recorded as built but its directory is gone, rebuilding");
                        locked.forget(&key);
                        locked.transition(&key, BuildStatus::InProgress);
                        locked.commit()?;
                        true
                    }
                    BuildStatus::Done => {
                        debug!("{key} already built, skipping");
                        return Ok(BuildOutcome::AlreadyBuilt);
                    }
                    BuildStatus::Failed => {
                        return Err(BuildError::PreviouslyFailed { build_dir: key });
                    }
                }
            };

            if claimed {
                return self.run_build(&key, request);
            }
            info!("{key} is being built by another worker, waiting");
            if let Some(outcome) = self.wait_for_build(&key)? {
                return Ok(outcome);
            }
        }
    }

    fn run_build(&self, key: &str, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        let result = self.builder.build(request);
        let status = if result.is_ok() {
            BuildStatus::Done
        } else {
            BuildStatus::Failed
        };
        self.finish(key, status)?;

        match result {
            Ok(()) => Ok(BuildOutcome::Built),
            Err(BuildError::MemoryOverflow { region, .. }) if !self.options.overflow_as_errors => {
                warn!("{key}: {region} overflow");
                Ok(BuildOutcome::Overflow(format!("{region} overflow")))
            }
            Err(e) => Err(e),
        }
    }

    fn finish(&self, key: &str, status: BuildStatus) -> Result<(), BuildError> {
        let mut locked = self.ledger.lock()?;
        if !locked.transition(key, status) {
            warn!("{key} left IN_PROGRESS out of band, not recording {status}");
        }
        locked.commit()
    }

    /// Polls until `key` leaves IN_PROGRESS. `None` means the entry was cleared meanwhile
    /// and the caller should try to claim it again.
    fn wait_for_build(&self, key: &str) -> Result<Option<BuildOutcome>, BuildError> {
        let start = Instant::now();
        loop {
            thread::sleep(self.options.poll_interval);
            match self.ledger.status(key)? {
                BuildStatus::Done => return Ok(Some(BuildOutcome::AlreadyBuilt)),
                BuildStatus::Failed => {
                    return Err(BuildError::PreviouslyFailed {
                        build_dir: key.to_string(),
                    });
                }
                BuildStatus::InProgress => {}
                BuildStatus::NotDone => return Ok(None),
            }
            if start.elapsed() >= self.options.wait_timeout {
                return Err(BuildError::WaitTimeout {
                    build_dir: key.to_string(),
                    timeout: self.options.wait_timeout,
                });
            }
        }
    }
}
