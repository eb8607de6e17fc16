//! Data model shared by the orchestrator, the report and the adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The four experiment phases, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Baseline,
    FailureRate,
    DependencyHang,
    Recovery,
}

impl PhaseId {
    pub const ORDER: [PhaseId; 4] = [
        PhaseId::Baseline,
        PhaseId::FailureRate,
        PhaseId::DependencyHang,
        PhaseId::Recovery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseId::Baseline => "baseline",
            PhaseId::FailureRate => "failure_rate",
            PhaseId::DependencyHang => "dependency_hang",
            PhaseId::Recovery => "recovery",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            PhaseId::Baseline => "Baseline",
            PhaseId::FailureRate => "Failure Rate",
            PhaseId::DependencyHang => "Dependency Hang",
            PhaseId::Recovery => "Recovery",
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            PhaseId::Baseline => 0,
            PhaseId::FailureRate => 1,
            PhaseId::DependencyHang => 2,
            PhaseId::Recovery => 3,
        }
    }
}

impl std::str::FromStr for PhaseId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "baseline" => Ok(PhaseId::Baseline),
            "failure_rate" => Ok(PhaseId::FailureRate),
            "dependency_hang" | "timeout" => Ok(PhaseId::DependencyHang),
            "recovery" => Ok(PhaseId::Recovery),
            other => Err(format!(
                "invalid phase '{other}'. valid values: baseline, failure_rate, dependency_hang, recovery"
            )),
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Skipped,
    DryRun,
    Pending,
    Passed,
    Failed,
    Error,
    Completed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::DryRun => "dry_run",
            PhaseStatus::Pending => "pending",
            PhaseStatus::Passed => "passed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Error => "error",
            PhaseStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PhaseStatus::Pending)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Observed { elapsed_secs: f64 },
    TimedOut,
}

impl ProbeOutcome {
    pub fn observed(elapsed_secs: f64) -> Self {
        ProbeOutcome::Observed {
            elapsed_secs: round_tenths(elapsed_secs),
        }
    }

    pub fn elapsed_secs(self) -> Option<f64> {
        match self {
            ProbeOutcome::Observed { elapsed_secs } => Some(elapsed_secs),
            ProbeOutcome::TimedOut => None,
        }
    }

    pub fn is_observed(self) -> bool {
        matches!(self, ProbeOutcome::Observed { .. })
    }
}

/// Round to one decimal place, the precision every timing is reported at.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// The worker's configuration as captured at run start.
///
/// Fields are private so a snapshot cannot be edited after capture; deltas
/// are always computed against a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    env_vars: BTreeMap<String, String>,
    time_limit_secs: u64,
    captured_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn new(
        env_vars: BTreeMap<String, String>,
        time_limit_secs: u64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            env_vars,
            time_limit_secs,
            captured_at,
        }
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    pub fn time_limit_secs(&self) -> u64 {
        self.time_limit_secs
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Original environment with `overrides` layered on top.
    pub fn env_with(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.env_vars.clone();
        for (key, value) in overrides {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Keys from `chaos_keys` already present in the captured environment.
    pub fn active_chaos_keys(&self, chaos_keys: &[&str]) -> Vec<String> {
        chaos_keys
            .iter()
            .filter(|key| self.env_vars.contains_key(**key))
            .map(|key| key.to_string())
            .collect()
    }
}

/// Values applied for a single chaos phase invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosParameters {
    pub failure_probability: Option<f64>,
    pub induced_delay_secs: Option<u64>,
    pub time_limit_secs: Option<u64>,
    pub visibility_timeout_secs: u64,
}

impl ChaosParameters {
    pub fn crash(failure_probability: f64, visibility_timeout_secs: u64) -> Self {
        Self {
            failure_probability: Some(failure_probability),
            induced_delay_secs: None,
            time_limit_secs: None,
            visibility_timeout_secs,
        }
    }

    /// Hang parameters: the visibility timeout is widened past the shortened
    /// limit so forced termination, not redelivery, drives each retry.
    pub fn hang(induced_delay_secs: u64, time_limit_secs: u64, margin_secs: u64) -> Self {
        Self {
            failure_probability: None,
            induced_delay_secs: Some(induced_delay_secs),
            time_limit_secs: Some(time_limit_secs),
            visibility_timeout_secs: time_limit_secs + margin_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub observed: usize,
    pub missing: usize,
    pub mean_secs: Option<f64>,
    pub min_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

impl SampleSummary {
    /// Summarise timing samples. Absent samples are counted but never
    /// contribute to mean/min/max.
    pub fn from_samples(samples: &[Option<f64>]) -> Self {
        let observed = samples.iter().flatten().copied().collect::<Vec<_>>();
        let missing = samples.len() - observed.len();
        if observed.is_empty() {
            return Self {
                observed: 0,
                missing,
                mean_secs: None,
                min_secs: None,
                max_secs: None,
            };
        }

        let sum: f64 = observed.iter().sum();
        let min = observed.iter().copied().fold(f64::INFINITY, f64::min);
        let max = observed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            observed: observed.len(),
            missing,
            mean_secs: Some(round_tenths(sum / observed.len() as f64)),
            min_secs: Some(min),
            max_secs: Some(max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub label: String,
    pub video_id: String,
    pub key: String,
    pub color: String,
}

/// Deterministic-timing sub-experiment of the failure-rate phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqTimingRun {
    pub failure_probability: f64,
    pub visibility_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub samples_secs: Vec<Option<f64>>,
    pub summary: SampleSummary,
    pub detection_secs: Option<f64>,
    pub error_count: u64,
}

/// Reporting sub-experiment of the failure-rate phase: only the error-rate
/// metric is sampled, arrival is never timed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateRun {
    pub failure_probability: f64,
    pub units: usize,
    pub settle_window_secs: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseMeasurements {
    None,
    Baseline {
        result: Option<ProbeOutcome>,
    },
    FailureRate {
        dlq_timing: Option<DlqTimingRun>,
        error_rate: Option<ErrorRateRun>,
    },
    DependencyHang {
        expected_dlq_bound_secs: u64,
        probe_timeout_secs: u64,
        dlq_routing: Option<ProbeOutcome>,
        detection_secs: Option<f64>,
        error_count: u64,
    },
    Recovery {
        result: Option<ProbeOutcome>,
        drained_messages: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub parameters: Option<ChaosParameters>,
    pub uploads: Vec<UploadRecord>,
    pub measurements: PhaseMeasurements,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn pending(phase: PhaseId) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            parameters: None,
            uploads: Vec::new(),
            measurements: PhaseMeasurements::None,
            error: None,
        }
    }

    pub fn skipped(phase: PhaseId) -> Self {
        Self {
            status: PhaseStatus::Skipped,
            ..Self::pending(phase)
        }
    }

    pub fn dry_run(phase: PhaseId, parameters: Option<ChaosParameters>) -> Self {
        Self {
            status: PhaseStatus::DryRun,
            parameters,
            ..Self::pending(phase)
        }
    }

    pub fn errored(mut self, message: impl Into<String>) -> Self {
        self.status = PhaseStatus::Error;
        self.error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Restored,
    DryRun,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub status: RestoreStatus,
    pub drained_messages: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub interrupted: bool,
    /// Worker time limit captured before any chaos was applied.
    pub original_time_limit_secs: u64,
    pub phases: Vec<PhaseResult>,
    pub restore: RestoreRecord,
}

impl RunReport {
    pub fn phase(&self, phase: PhaseId) -> Option<&PhaseResult> {
        self.phases.iter().find(|result| result.phase == phase)
    }
}
