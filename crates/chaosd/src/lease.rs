//! Exclusive hold on the worker's configuration for the length of a run.
//!
//! [`ConfigLayer`] reads and writes the worker configuration and waits for
//! each write to propagate. [`ChaosLease`] captures the snapshot and puts
//! everything back exactly once, either through [`ChaosLease::release`] or,
//! if the sequencer unwinds, from `Drop`.

use std::collections::BTreeMap;
use std::time::Duration;

use chaos_core::config::ProbeTuning;
use chaos_core::services::{
    BackendError, ComputeConfigService, ConfigUpdate, QueueService, UpdateHandle, UpdateStatus,
};
use chaos_core::types::{ConfigSnapshot, RestoreRecord, RestoreStatus};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::pipeline::drain_queue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigLayerError {
    #[error("failed to read configuration of {function}: {source}")]
    Read {
        function: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to write configuration of {function}: {source}")]
    Write {
        function: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to check update status of {function}: {source}")]
    Status {
        function: String,
        #[source]
        source: BackendError,
    },
    #[error("configuration update of {function} was rejected")]
    UpdateFailed { function: String },
    #[error("update of {function} did not propagate after {attempts} checks ({waited_secs}s)")]
    PropagationTimeout {
        function: String,
        attempts: u32,
        waited_secs: u64,
    },
}

impl ConfigLayerError {
    /// Read failures leave nothing altered; everything else may have.
    pub fn is_read(&self) -> bool {
        matches!(self, ConfigLayerError::Read { .. })
    }
}

#[derive(Clone)]
pub struct ConfigLayer<'a> {
    compute: &'a dyn ComputeConfigService,
    clock: &'a dyn Clock,
    function: String,
    attempts: u32,
    interval: Duration,
}

impl std::fmt::Debug for ConfigLayer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLayer")
            .field("function", &self.function)
            .field("attempts", &self.attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<'a> ConfigLayer<'a> {
    pub fn new(
        compute: &'a dyn ComputeConfigService,
        clock: &'a dyn Clock,
        function: impl Into<String>,
        probes: &ProbeTuning,
    ) -> Self {
        Self {
            compute,
            clock,
            function: function.into(),
            attempts: probes.propagation_attempts.max(1),
            interval: Duration::from_secs(probes.propagation_interval_secs),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn snapshot(&self) -> Result<ConfigSnapshot, ConfigLayerError> {
        let current = self
            .compute
            .read(&self.function)
            .map_err(|source| ConfigLayerError::Read {
                function: self.function.clone(),
                source,
            })?;
        Ok(ConfigSnapshot::new(
            current.env_vars,
            current.time_limit_secs,
            self.clock.wall_now(),
        ))
    }

    /// Push `delta` layered over the snapshot environment, optionally with a
    /// new time limit, and block until it has propagated. Every apply starts
    /// from the snapshot, so keys set by an earlier apply are dropped.
    pub fn apply(
        &self,
        snapshot: &ConfigSnapshot,
        delta: &BTreeMap<String, String>,
        time_limit_secs: Option<u64>,
    ) -> Result<(), ConfigLayerError> {
        self.push(&ConfigUpdate {
            env_vars: Some(snapshot.env_with(delta)),
            time_limit_secs,
        })
    }

    /// Re-apply the full original environment and time limit.
    pub fn restore(&self, snapshot: &ConfigSnapshot) -> Result<(), ConfigLayerError> {
        self.push(&ConfigUpdate {
            env_vars: Some(snapshot.env_vars().clone()),
            time_limit_secs: Some(snapshot.time_limit_secs()),
        })
    }

    fn push(&self, update: &ConfigUpdate) -> Result<(), ConfigLayerError> {
        let handle = self
            .compute
            .write(&self.function, update)
            .map_err(|source| ConfigLayerError::Write {
                function: self.function.clone(),
                source,
            })?;
        self.wait_for_propagation(&handle)
    }

    fn wait_for_propagation(&self, handle: &UpdateHandle) -> Result<(), ConfigLayerError> {
        for attempt in 1..=self.attempts {
            let status = self
                .compute
                .status(handle)
                .map_err(|source| ConfigLayerError::Status {
                    function: self.function.clone(),
                    source,
                })?;
            match status {
                UpdateStatus::Succeeded => {
                    debug!(function = %self.function, attempt, "configuration propagated");
                    return Ok(());
                }
                UpdateStatus::Failed => {
                    return Err(ConfigLayerError::UpdateFailed {
                        function: self.function.clone(),
                    })
                }
                UpdateStatus::Pending => self.clock.sleep(self.interval),
            }
        }
        Err(ConfigLayerError::PropagationTimeout {
            function: self.function.clone(),
            attempts: self.attempts,
            waited_secs: self.interval.as_secs() * u64::from(self.attempts),
        })
    }
}

/// Restoration left the pipeline in an altered state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("restoration incomplete: {}", .failures.join("; "))]
pub struct RestoreFailure {
    pub failures: Vec<String>,
    pub drained_messages: usize,
}

impl RestoreFailure {
    pub fn to_record(&self) -> RestoreRecord {
        RestoreRecord {
            status: RestoreStatus::Failed,
            drained_messages: self.drained_messages,
            detail: Some(self.failures.join("; ")),
        }
    }
}

/// Queue side of what the lease puts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRestore {
    pub main_queue: String,
    pub dead_letter_queue: String,
    pub visibility_timeout_secs: u64,
}

pub struct ChaosLease<'a> {
    layer: ConfigLayer<'a>,
    queue: &'a dyn QueueService,
    queues: QueueRestore,
    snapshot: ConfigSnapshot,
    dry_run: bool,
    released: bool,
}

impl<'a> ChaosLease<'a> {
    /// Capture the snapshot. Reading is allowed in dry-run; nothing else is.
    pub fn acquire(
        layer: ConfigLayer<'a>,
        queue: &'a dyn QueueService,
        queues: QueueRestore,
        dry_run: bool,
    ) -> Result<Self, ConfigLayerError> {
        let snapshot = layer.snapshot()?;
        info!(
            function = layer.function(),
            env_vars = snapshot.env_vars().len(),
            time_limit_secs = snapshot.time_limit_secs(),
            dry_run,
            "captured configuration snapshot"
        );
        Ok(Self {
            layer,
            queue,
            queues,
            snapshot,
            dry_run,
            released: false,
        })
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn layer(&self) -> &ConfigLayer<'a> {
        &self.layer
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn release(mut self) -> Result<RestoreRecord, RestoreFailure> {
        self.released = true;
        self.restore()
    }

    fn restore(&self) -> Result<RestoreRecord, RestoreFailure> {
        if self.dry_run {
            info!("dry run: restoration skipped, nothing was changed");
            return Ok(RestoreRecord {
                status: RestoreStatus::DryRun,
                drained_messages: 0,
                detail: None,
            });
        }

        info!(
            function = self.layer.function(),
            visibility_timeout_secs = self.queues.visibility_timeout_secs,
            "restoring worker configuration and queue settings"
        );
        let mut failures = Vec::new();
        if let Err(err) = self.layer.restore(&self.snapshot) {
            failures.push(format!("worker configuration: {err}"));
        }
        if let Err(err) = self
            .queue
            .set_visibility_timeout(&self.queues.main_queue, self.queues.visibility_timeout_secs)
        {
            failures.push(format!("queue visibility timeout: {err}"));
        }
        let drained_messages = match drain_queue(self.queue, &self.queues.dead_letter_queue) {
            Ok(count) => count,
            Err(err) => {
                failures.push(format!("dead-letter drain: {err}"));
                0
            }
        };

        if failures.is_empty() {
            info!(drained_messages, "restore complete");
            Ok(RestoreRecord {
                status: RestoreStatus::Restored,
                drained_messages,
                detail: None,
            })
        } else {
            Err(RestoreFailure {
                failures,
                drained_messages,
            })
        }
    }
}

impl Drop for ChaosLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!("chaos lease dropped without release; restoring now");
        if let Err(failure) = self.restore() {
            error!(%failure, "restore failed -- MANUAL ACTION REQUIRED");
        }
    }
}
