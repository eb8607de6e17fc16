//! The four experiments.
//!
//! Each phase writes into its own [`PhaseResult`] as it goes, so a failure
//! part-way keeps whatever was already measured. Failures are contained as
//! status `error`; only operator cancellation and config writes that may
//! have left the worker altered halt the sequence.

use std::time::Duration;

use chaos_core::config::ChaosConfig;
use chaos_core::services::BackendError;
use chaos_core::types::{
    ChaosParameters, ConfigSnapshot, DlqTimingRun, ErrorRateRun, PhaseId, PhaseMeasurements,
    PhaseResult, PhaseStatus, ProbeOutcome, SampleSummary,
};
use chaos_media::WorkloadGenerator;
use tracing::{error, info, warn};

use crate::injector::{expected_hang_bound_secs, FaultInjector, InjectError};
use crate::journal::{JournalSink, ProbeKind, RunEvent};
use crate::lease::{ConfigLayer, ConfigLayerError};
use crate::pipeline::Backends;
use crate::poll::{Pacer, PollError};
use crate::probes::Probes;
use crate::workload::{UploadError, UploadedUnit, Uploader};

const TIMING_COLORS: [&str; 3] = ["red", "green", "orange"];
const REPORTING_COLORS: [&str; 3] = ["cyan", "magenta", "yellow"];

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("cancelled by operator")]
    Cancelled,
    #[error(transparent)]
    Config(ConfigLayerError),
    #[error(transparent)]
    Backend(BackendError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("chaos keys already active before baseline: {}", .keys.join(", "))]
    StaleChaos { keys: Vec<String> },
}

impl From<ConfigLayerError> for PhaseError {
    fn from(err: ConfigLayerError) -> Self {
        PhaseError::Config(err)
    }
}

impl From<BackendError> for PhaseError {
    fn from(err: BackendError) -> Self {
        PhaseError::Backend(err)
    }
}

impl From<PollError> for PhaseError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Cancelled => PhaseError::Cancelled,
            PollError::Backend(err) => PhaseError::Backend(err),
        }
    }
}

impl From<InjectError> for PhaseError {
    fn from(err: InjectError) -> Self {
        match err {
            InjectError::Config(err) => PhaseError::Config(err),
            InjectError::Queue { source, .. } => PhaseError::Backend(source),
        }
    }
}

/// Why the sequencer must stop after this phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    Cancelled,
    /// The worker configuration may be in an unknown state.
    Fatal(String),
}

impl PhaseError {
    pub fn halt(&self) -> Option<Halt> {
        match self {
            PhaseError::Cancelled => Some(Halt::Cancelled),
            PhaseError::Config(err) if !err.is_read() => Some(Halt::Fatal(err.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRun {
    pub result: PhaseResult,
    pub halt: Option<Halt>,
}

pub struct PhaseContext<'a> {
    pub config: &'a ChaosConfig,
    pub snapshot: &'a ConfigSnapshot,
    pub layer: &'a ConfigLayer<'a>,
    pub backends: Backends<'a>,
    pub generator: &'a dyn WorkloadGenerator,
    pub pacer: Pacer<'a>,
    pub journal: Option<JournalSink<'a>>,
}

impl<'a> PhaseContext<'a> {
    fn record_injection(&self, phase: PhaseId, parameters: &ChaosParameters) {
        if let Some(journal) = &self.journal {
            journal.record(RunEvent::Injected {
                phase,
                parameters: parameters.clone(),
            });
        }
    }

    fn record_probe(
        &self,
        phase: PhaseId,
        probe: ProbeKind,
        video_id: Option<&str>,
        outcome: ProbeOutcome,
    ) {
        if let Some(journal) = &self.journal {
            journal.record(RunEvent::ProbeFinished {
                phase,
                probe,
                video_id: video_id.map(str::to_string),
                outcome,
            });
        }
    }

    fn injector(&self) -> FaultInjector<'_> {
        FaultInjector {
            layer: self.layer,
            queue: self.backends.queue,
            main_queue: &self.config.pipeline.queue_url,
            dead_letter_queue: &self.config.pipeline.dlq_url,
            tuning: &self.config.chaos,
        }
    }

    fn probes(&self) -> Probes<'_> {
        Probes {
            backends: self.backends,
            pacer: self.pacer,
            tuning: &self.config.probes,
            function: &self.config.pipeline.function_name,
            dead_letter_queue: &self.config.pipeline.dlq_url,
            results_bucket: &self.config.pipeline.results_bucket,
            user_prefix: &self.config.workload.user_prefix,
        }
    }

    fn uploader(&self) -> Uploader<'_> {
        Uploader {
            store: self.backends.store,
            generator: self.generator,
            clock: self.pacer.clock,
            bucket: &self.config.pipeline.video_bucket,
            user_prefix: &self.config.workload.user_prefix,
            clip_duration_secs: self.config.workload.clip_duration_secs,
        }
    }

    fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.config.probes.result_timeout_secs)
    }
}

fn detection_outcome(detection_secs: Option<f64>) -> ProbeOutcome {
    detection_secs.map_or(ProbeOutcome::TimedOut, ProbeOutcome::observed)
}

/// Dead-letter probe timeout for crash-rate timing samples: the floor, or
/// the full retry budget at the crash visibility timeout plus slack.
pub fn failure_rate_probe_timeout_secs(config: &ChaosConfig) -> u64 {
    let budget =
        u64::from(config.chaos.max_receive_count) * config.chaos.crash_visibility_timeout_secs;
    config
        .probes
        .dlq_poll_timeout_secs
        .max(budget + config.probes.dlq_slack_secs)
}

/// Dead-letter probe timeout for the hang phase; never below the expected
/// worst-case bound.
pub fn hang_probe_timeout_secs(config: &ChaosConfig) -> u64 {
    config
        .probes
        .dlq_poll_timeout_secs
        .max(expected_hang_bound_secs(&config.chaos) + config.probes.dlq_slack_secs)
}

pub fn run_phase(ctx: &PhaseContext<'_>, phase: PhaseId) -> PhaseRun {
    info!(phase = %phase, "phase started");
    let mut result = PhaseResult::pending(phase);
    let outcome = match phase {
        PhaseId::Baseline => baseline(ctx, &mut result),
        PhaseId::FailureRate => failure_rate(ctx, &mut result),
        PhaseId::DependencyHang => dependency_hang(ctx, &mut result),
        PhaseId::Recovery => recovery(ctx, &mut result),
    };

    match outcome {
        Ok(()) => {
            info!(phase = %phase, status = %result.status, "phase finished");
            PhaseRun { result, halt: None }
        }
        Err(err) => {
            let halt = err.halt();
            match &halt {
                Some(Halt::Cancelled) => warn!(phase = %phase, "phase cancelled by operator"),
                Some(Halt::Fatal(_)) => {
                    error!(phase = %phase, error = %err, "phase aborted the run")
                }
                None => warn!(phase = %phase, error = %err, "phase failed"),
            }
            PhaseRun {
                result: result.errored(err.to_string()),
                halt,
            }
        }
    }
}

fn baseline(ctx: &PhaseContext<'_>, result: &mut PhaseResult) -> Result<(), PhaseError> {
    let current = ctx.layer.snapshot()?;
    let stale = current.active_chaos_keys(&ctx.config.chaos.chaos_env_keys());
    if !stale.is_empty() {
        return Err(PhaseError::StaleChaos { keys: stale });
    }

    let unit = ctx.uploader().upload("baseline", "blue")?;
    result.uploads.push(unit.record.clone());
    let outcome = ctx.probes().poll_result_artifact(
        &unit.record.video_id,
        unit.uploaded_at,
        ctx.result_timeout(),
    )?;
    ctx.record_probe(
        PhaseId::Baseline,
        ProbeKind::ResultArtifact,
        Some(&unit.record.video_id),
        outcome,
    );

    result.measurements = PhaseMeasurements::Baseline {
        result: Some(outcome),
    };
    result.status = if outcome.is_observed() {
        PhaseStatus::Passed
    } else {
        PhaseStatus::Failed
    };
    Ok(())
}

fn failure_rate(ctx: &PhaseContext<'_>, result: &mut PhaseResult) -> Result<(), PhaseError> {
    let chaos = &ctx.config.chaos;
    let probe_tuning = &ctx.config.probes;
    let clock = ctx.pacer.clock;
    let injector = ctx.injector();
    let probes = ctx.probes();
    let mut generation_failures = Vec::new();
    result.measurements = PhaseMeasurements::FailureRate {
        dlq_timing: None,
        error_rate: None,
    };

    // Timing run: every invocation fails, so every unit must dead-letter.
    let parameters = injector.crash(ctx.snapshot, 1.0)?;
    ctx.record_injection(PhaseId::FailureRate, &parameters);
    let visibility_timeout_secs = parameters.visibility_timeout_secs;
    result.parameters = Some(parameters);
    let detection_start = clock.wall_now();
    let units = upload_batch(
        ctx,
        "chaos-fail",
        &TIMING_COLORS,
        chaos.failure_rate_units,
        result,
        &mut generation_failures,
    )?;

    let probe_timeout_secs = failure_rate_probe_timeout_secs(ctx.config);
    let mut samples = Vec::with_capacity(units.len());
    for unit in &units {
        let outcome =
            probes.poll_dead_letter(unit.uploaded_at, Duration::from_secs(probe_timeout_secs))?;
        ctx.record_probe(
            PhaseId::FailureRate,
            ProbeKind::DeadLetter,
            Some(&unit.record.video_id),
            outcome,
        );
        samples.push(outcome.elapsed_secs());
    }
    let detection_secs = probes.first_error_after(
        detection_start,
        Duration::from_secs(probe_tuning.metrics_window_secs),
    )?;
    ctx.record_probe(
        PhaseId::FailureRate,
        ProbeKind::FirstError,
        None,
        detection_outcome(detection_secs),
    );
    let error_count = probes.error_count(detection_start, clock.wall_now())?;
    let summary = SampleSummary::from_samples(&samples);
    info!(
        observed = summary.observed,
        missing = summary.missing,
        mean_secs = ?summary.mean_secs,
        detection_secs = ?detection_secs,
        error_count,
        "dead-letter timing run finished"
    );
    if let PhaseMeasurements::FailureRate { dlq_timing, .. } = &mut result.measurements {
        *dlq_timing = Some(DlqTimingRun {
            failure_probability: 1.0,
            visibility_timeout_secs,
            probe_timeout_secs,
            samples_secs: samples,
            summary,
            detection_secs,
            error_count,
        });
    }

    // Reporting run: nominal probability, error metric only.
    let failure_probability = chaos.reporting_failure_probability;
    injector.set_crash_probability(ctx.snapshot, failure_probability)?;
    ctx.record_injection(
        PhaseId::FailureRate,
        &ChaosParameters::crash(failure_probability, visibility_timeout_secs),
    );
    let reporting_start = clock.wall_now();
    let reporting_units = upload_batch(
        ctx,
        "chaos-rate",
        &REPORTING_COLORS,
        chaos.reporting_units,
        result,
        &mut generation_failures,
    )?;
    ctx.pacer
        .pause(Duration::from_secs(probe_tuning.error_rate_settle_secs))?;
    let error_count = probes.error_count(reporting_start, clock.wall_now())?;
    info!(failure_probability, error_count, "error-rate run finished");
    if let PhaseMeasurements::FailureRate { error_rate, .. } = &mut result.measurements {
        *error_rate = Some(ErrorRateRun {
            failure_probability,
            units: reporting_units.len(),
            settle_window_secs: probe_tuning.error_rate_settle_secs,
            error_count,
        });
    }

    if generation_failures.is_empty() {
        result.status = PhaseStatus::Completed;
    } else {
        result.status = PhaseStatus::Error;
        result.error = Some(format!(
            "workload generation failed: {}",
            generation_failures.join("; ")
        ));
    }
    Ok(())
}

fn dependency_hang(ctx: &PhaseContext<'_>, result: &mut PhaseResult) -> Result<(), PhaseError> {
    let clock = ctx.pacer.clock;
    let probes = ctx.probes();
    let expected_dlq_bound_secs = expected_hang_bound_secs(&ctx.config.chaos);
    let probe_timeout_secs = hang_probe_timeout_secs(ctx.config);
    result.measurements = PhaseMeasurements::DependencyHang {
        expected_dlq_bound_secs,
        probe_timeout_secs,
        dlq_routing: None,
        detection_secs: None,
        error_count: 0,
    };

    let parameters = ctx.injector().hang(ctx.snapshot)?;
    ctx.record_injection(PhaseId::DependencyHang, &parameters);
    result.parameters = Some(parameters);
    let detection_start = clock.wall_now();
    let unit = ctx.uploader().upload("chaos-timeout", "purple")?;
    result.uploads.push(unit.record.clone());

    let routing =
        probes.poll_dead_letter(unit.uploaded_at, Duration::from_secs(probe_timeout_secs))?;
    let window = expected_dlq_bound_secs + ctx.config.probes.metrics_extra_window_secs;
    ctx.record_probe(
        PhaseId::DependencyHang,
        ProbeKind::DeadLetter,
        Some(&unit.record.video_id),
        routing,
    );
    let first_error = probes.first_error_after(detection_start, Duration::from_secs(window))?;
    ctx.record_probe(
        PhaseId::DependencyHang,
        ProbeKind::FirstError,
        None,
        detection_outcome(first_error),
    );
    let errors = probes.error_count(detection_start, clock.wall_now())?;
    info!(
        expected_dlq_bound_secs,
        routing_secs = ?routing.elapsed_secs(),
        detection_secs = ?first_error,
        error_count = errors,
        "dependency-hang run finished"
    );

    if let PhaseMeasurements::DependencyHang {
        dlq_routing,
        detection_secs,
        error_count,
        ..
    } = &mut result.measurements
    {
        *dlq_routing = Some(routing);
        *detection_secs = first_error;
        *error_count = errors;
    }
    result.status = PhaseStatus::Completed;
    Ok(())
}

fn recovery(ctx: &PhaseContext<'_>, result: &mut PhaseResult) -> Result<(), PhaseError> {
    let pipeline = &ctx.config.pipeline;
    ctx.layer.restore(ctx.snapshot)?;
    ctx.backends.queue.set_visibility_timeout(
        &pipeline.queue_url,
        ctx.config.chaos.original_visibility_timeout_secs,
    )?;
    let drained_messages = ctx.probes().drain_dead_letter()?;
    result.measurements = PhaseMeasurements::Recovery {
        result: None,
        drained_messages,
    };
    info!(drained_messages, "original configuration restored for recovery check");

    ctx.pacer
        .pause(Duration::from_secs(ctx.config.probes.recovery_settle_secs))?;
    let unit = ctx.uploader().upload("recovery", "green")?;
    result.uploads.push(unit.record.clone());
    let outcome = ctx.probes().poll_result_artifact(
        &unit.record.video_id,
        unit.uploaded_at,
        ctx.result_timeout(),
    )?;
    ctx.record_probe(
        PhaseId::Recovery,
        ProbeKind::ResultArtifact,
        Some(&unit.record.video_id),
        outcome,
    );

    result.measurements = PhaseMeasurements::Recovery {
        result: Some(outcome),
        drained_messages,
    };
    result.status = if outcome.is_observed() {
        PhaseStatus::Passed
    } else {
        PhaseStatus::Failed
    };
    Ok(())
}

/// Upload `count` units with fixed spacing. Generation failures skip the
/// unit and are collected; store failures end the phase.
fn upload_batch(
    ctx: &PhaseContext<'_>,
    label: &str,
    colors: &[&str],
    count: usize,
    result: &mut PhaseResult,
    generation_failures: &mut Vec<String>,
) -> Result<Vec<UploadedUnit>, PhaseError> {
    let uploader = ctx.uploader();
    let spacing = Duration::from_secs(ctx.config.probes.upload_spacing_secs);
    let mut units = Vec::with_capacity(count);
    for index in 0..count {
        if index > 0 {
            ctx.pacer.pause(spacing)?;
        }
        let color = colors[index % colors.len()];
        match uploader.upload(&format!("{label}-{index}"), color) {
            Ok(unit) => {
                result.uploads.push(unit.record.clone());
                units.push(unit);
            }
            Err(UploadError::Generate(err)) => {
                warn!(label, index, error = %err, "skipping unit, clip generation failed");
                generation_failures.push(err.to_string());
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(units)
}
