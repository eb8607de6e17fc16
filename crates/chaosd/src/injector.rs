//! Chaos deltas for the two fault classes.
//!
//! Crash-rate mode sets a per-invocation failure probability. Timing runs
//! always use 1.0: with `r` receives, a message reaches the dead-letter queue
//! with probability `p^r`, which at 0.5 and three receives is only 12.5%.
//! The nominal probability is applied separately and only sampled through
//! the error metric.
//!
//! Dependency-hang mode delays the external call past a shortened time limit
//! and widens the visibility timeout to `limit + margin`, so forced
//! termination drives each retry.

use std::collections::BTreeMap;

use chaos_core::config::ChaosTuning;
use chaos_core::services::{BackendError, QueueService};
use chaos_core::types::{ChaosParameters, ConfigSnapshot, PhaseId};
use tracing::info;

use crate::lease::{ConfigLayer, ConfigLayerError};
use crate::pipeline::drain_queue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    #[error(transparent)]
    Config(#[from] ConfigLayerError),
    #[error("queue {operation} failed: {source}")]
    Queue {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

pub struct FaultInjector<'a> {
    pub layer: &'a ConfigLayer<'a>,
    pub queue: &'a dyn QueueService,
    pub main_queue: &'a str,
    pub dead_letter_queue: &'a str,
    pub tuning: &'a ChaosTuning,
}

impl<'a> FaultInjector<'a> {
    /// Drain stale dead letters, shorten the visibility timeout, and set the
    /// failure probability.
    pub fn crash(
        &self,
        snapshot: &ConfigSnapshot,
        failure_probability: f64,
    ) -> Result<ChaosParameters, InjectError> {
        let parameters =
            ChaosParameters::crash(failure_probability, self.tuning.crash_visibility_timeout_secs);
        self.prepare_queues(parameters.visibility_timeout_secs)?;
        self.set_crash_probability(snapshot, failure_probability)?;
        Ok(parameters)
    }

    /// Replace the active failure probability; blocks until propagated so no
    /// invocation sees the previous value afterwards.
    pub fn set_crash_probability(
        &self,
        snapshot: &ConfigSnapshot,
        failure_probability: f64,
    ) -> Result<(), InjectError> {
        let delta = BTreeMap::from([(
            self.tuning.failure_rate_env_key.clone(),
            format_probability(failure_probability),
        )]);
        self.layer.apply(snapshot, &delta, None)?;
        info!(failure_probability, "crash-rate chaos active");
        Ok(())
    }

    pub fn hang(&self, snapshot: &ConfigSnapshot) -> Result<ChaosParameters, InjectError> {
        let parameters = hang_parameters(self.tuning);
        self.prepare_queues(parameters.visibility_timeout_secs)?;
        let delta = BTreeMap::from([(
            self.tuning.induced_delay_env_key.clone(),
            self.tuning.induced_delay_secs.to_string(),
        )]);
        self.layer
            .apply(snapshot, &delta, parameters.time_limit_secs)?;
        info!(
            induced_delay_secs = self.tuning.induced_delay_secs,
            time_limit_secs = self.tuning.hang_time_limit_secs,
            visibility_timeout_secs = parameters.visibility_timeout_secs,
            "dependency-hang chaos active"
        );
        Ok(parameters)
    }

    fn prepare_queues(&self, visibility_timeout_secs: u64) -> Result<(), InjectError> {
        let drained =
            drain_queue(self.queue, self.dead_letter_queue).map_err(|source| InjectError::Queue {
                operation: "drain",
                source,
            })?;
        if drained > 0 {
            info!(drained, "removed stale dead letters");
        }
        self.queue
            .set_visibility_timeout(self.main_queue, visibility_timeout_secs)
            .map_err(|source| InjectError::Queue {
                operation: "set-visibility-timeout",
                source,
            })
    }
}

pub fn hang_parameters(tuning: &ChaosTuning) -> ChaosParameters {
    ChaosParameters::hang(
        tuning.induced_delay_secs,
        tuning.hang_time_limit_secs,
        tuning.visibility_margin_secs,
    )
}

/// Parameters a phase would apply, reported by dry runs.
pub fn planned_parameters(phase: PhaseId, tuning: &ChaosTuning) -> Option<ChaosParameters> {
    match phase {
        PhaseId::Baseline | PhaseId::Recovery => None,
        PhaseId::FailureRate => Some(ChaosParameters::crash(
            1.0,
            tuning.crash_visibility_timeout_secs,
        )),
        PhaseId::DependencyHang => Some(hang_parameters(tuning)),
    }
}

/// Worst-case seconds for a hung unit to reach the dead-letter queue: every
/// receive but the last waits out `limit + margin`, the last runs to `limit`.
pub fn expected_hang_bound_secs(tuning: &ChaosTuning) -> u64 {
    let limit = tuning.hang_time_limit_secs;
    u64::from(tuning.max_receive_count) * (limit + tuning.visibility_margin_secs) + limit
}

/// Whole probabilities keep one decimal (`1.0`), matching what the worker
/// has always been given.
pub fn format_probability(probability: f64) -> String {
    if probability.fract() == 0.0 {
        format!("{probability:.1}")
    } else {
        probability.to_string()
    }
}
