//! Runs the phases in order inside the chaos lease.
//!
//! The lease is acquired before the first phase and released exactly once
//! after the last one, whichever way the sequence ended: completion, a
//! contained phase error, a fatal config error, or operator cancellation.

use chaos_core::config::ChaosConfig;
use chaos_core::types::{PhaseId, PhaseResult, RestoreRecord, RunId, RunReport};
use chaos_media::WorkloadGenerator;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::injector::planned_parameters;
use crate::journal::{JournalSink, RunEvent, RunJournal};
use crate::lease::{ChaosLease, ConfigLayer, ConfigLayerError, QueueRestore, RestoreFailure};
use crate::phases::{run_phase, Halt, PhaseContext};
use crate::pipeline::Backends;
use crate::poll::Pacer;
use crate::state_machine::PhaseSequence;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_baseline: bool,
    /// Skips the dependency-hang phase.
    pub skip_timeout: bool,
    pub dry_run: bool,
}

impl RunOptions {
    /// The failure-rate and recovery phases always run together.
    pub fn skips(&self, phase: PhaseId) -> bool {
        match phase {
            PhaseId::Baseline => self.skip_baseline,
            PhaseId::DependencyHang => self.skip_timeout,
            PhaseId::FailureRate | PhaseId::Recovery => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("could not capture the worker configuration snapshot: {0}")]
    Snapshot(#[source] ConfigLayerError),
}

#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Reason the sequence was aborted early by a config-layer failure.
    pub fatal: Option<String>,
    pub restore_failure: Option<RestoreFailure>,
}

impl RunOutcome {
    pub const EXIT_FATAL: i32 = 2;
    pub const EXIT_RESTORE_FAILED: i32 = 3;

    pub fn exit_code(&self) -> i32 {
        if self.restore_failure.is_some() {
            Self::EXIT_RESTORE_FAILED
        } else if self.fatal.is_some() {
            Self::EXIT_FATAL
        } else {
            0
        }
    }
}

struct SequenceProgress {
    phases: Vec<PhaseResult>,
    interrupted: bool,
    fatal: Option<String>,
}

pub struct Orchestrator<'a> {
    pub backends: Backends<'a>,
    pub generator: &'a dyn WorkloadGenerator,
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancelToken,
    pub config: &'a ChaosConfig,
    pub journal: Option<&'a RunJournal>,
}

impl Orchestrator<'_> {
    pub fn run(&self, run_id: &RunId, options: RunOptions) -> Result<RunOutcome, RunError> {
        info!(
            run_id = %run_id,
            dry_run = options.dry_run,
            skip_baseline = options.skip_baseline,
            skip_timeout = options.skip_timeout,
            "chaos run starting"
        );
        self.journal(
            run_id,
            RunEvent::RunStarted {
                dry_run: options.dry_run,
                skip_baseline: options.skip_baseline,
                skip_timeout: options.skip_timeout,
            },
        );

        let pipeline = &self.config.pipeline;
        let layer = ConfigLayer::new(
            self.backends.compute,
            self.clock,
            pipeline.function_name.as_str(),
            &self.config.probes,
        );
        let queues = QueueRestore {
            main_queue: pipeline.queue_url.clone(),
            dead_letter_queue: pipeline.dlq_url.clone(),
            visibility_timeout_secs: self.config.chaos.original_visibility_timeout_secs,
        };
        let lease = ChaosLease::acquire(layer, self.backends.queue, queues, options.dry_run)
            .map_err(RunError::Snapshot)?;
        let original_time_limit_secs = lease.snapshot().time_limit_secs();
        self.journal(
            run_id,
            RunEvent::SnapshotCaptured {
                env_vars: lease.snapshot().env_vars().len(),
                time_limit_secs: original_time_limit_secs,
            },
        );

        let progress = self.run_phases(run_id, &lease, options);

        let (restore, restore_failure) = match lease.release() {
            Ok(record) => (record, None),
            Err(failure) => {
                error!(%failure, "restore failed -- MANUAL ACTION REQUIRED");
                (failure.to_record(), Some(failure))
            }
        };
        self.journal(
            run_id,
            RunEvent::Restored {
                record: restore.clone(),
            },
        );
        self.journal(
            run_id,
            RunEvent::RunFinished {
                interrupted: progress.interrupted,
            },
        );

        Ok(RunOutcome {
            report: self.build_report(
                run_id,
                options,
                original_time_limit_secs,
                progress.phases,
                progress.interrupted,
                restore,
            ),
            fatal: progress.fatal,
            restore_failure,
        })
    }

    fn run_phases(
        &self,
        run_id: &RunId,
        lease: &ChaosLease<'_>,
        options: RunOptions,
    ) -> SequenceProgress {
        let ctx = PhaseContext {
            config: self.config,
            snapshot: lease.snapshot(),
            layer: lease.layer(),
            backends: self.backends,
            generator: self.generator,
            pacer: Pacer::new(self.clock, self.cancel),
            journal: self
                .journal
                .map(|journal| JournalSink::new(journal, run_id, self.clock)),
        };
        let mut sequence = PhaseSequence::new();
        let mut interrupted = false;
        let mut fatal = None;

        for phase in PhaseId::ORDER {
            if self.cancel.is_cancelled() {
                warn!(next_phase = %phase, "cancelled by operator; ending sequence");
                interrupted = true;
                break;
            }
            if let Err(err) = sequence.enter(phase) {
                fatal = Some(err.to_string());
                break;
            }

            let (result, halt) = if options.skips(phase) {
                info!(phase = %phase, "phase skipped");
                (PhaseResult::skipped(phase), None)
            } else if options.dry_run {
                let parameters = planned_parameters(phase, &self.config.chaos);
                info!(phase = %phase, ?parameters, "dry run: phase planned, nothing applied");
                (PhaseResult::dry_run(phase, parameters), None)
            } else {
                self.journal(run_id, RunEvent::PhaseStarted { phase });
                let run = run_phase(&ctx, phase);
                (run.result, run.halt)
            };

            self.journal(
                run_id,
                RunEvent::PhaseFinished {
                    result: result.clone(),
                },
            );
            if let Err(err) = sequence.record(result) {
                fatal = Some(err.to_string());
                break;
            }
            // SIGINT also reaches the in-flight `aws` child, so a cancelled
            // run can surface as a failed write rather than `Halt::Cancelled`.
            let cancelled = self.cancel.is_cancelled();
            match halt {
                Some(Halt::Fatal(reason)) if !cancelled => {
                    fatal = Some(reason);
                    break;
                }
                Some(Halt::Fatal(reason)) => {
                    warn!(phase = %phase, %reason, "phase failed after operator cancellation");
                    interrupted = true;
                    break;
                }
                Some(Halt::Cancelled) => {
                    interrupted = true;
                    break;
                }
                None if cancelled => {
                    warn!(phase = %phase, "cancelled by operator; ending sequence");
                    interrupted = true;
                    break;
                }
                None => {}
            }
        }

        SequenceProgress {
            phases: sequence.into_results(),
            interrupted,
            fatal,
        }
    }

    fn build_report(
        &self,
        run_id: &RunId,
        options: RunOptions,
        original_time_limit_secs: u64,
        phases: Vec<PhaseResult>,
        interrupted: bool,
        restore: RestoreRecord,
    ) -> RunReport {
        RunReport {
            run_id: run_id.clone(),
            timestamp: self.clock.wall_now(),
            dry_run: options.dry_run,
            interrupted,
            original_time_limit_secs,
            phases,
            restore,
        }
    }

    fn journal(&self, run_id: &RunId, event: RunEvent) {
        if let Some(journal) = self.journal {
            journal.record(self.clock.wall_now(), run_id, event);
        }
    }
}
