//! Observation probes. Every probe is bounded: a miss is `TimedOut`, never a
//! hang and never an error. Backend failures are errors.

use std::time::{Duration, Instant};

use chaos_core::config::ProbeTuning;
use chaos_core::services::BackendError;
use chaos_core::types::{round_tenths, ProbeOutcome};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::pipeline::{drain_queue, Backends};
use crate::poll::{Pacer, PollError};

/// Result artifacts live next to the upload, with a `.json` suffix.
pub fn result_key(user_prefix: &str, video_id: &str) -> String {
    format!("{user_prefix}/{video_id}.json")
}

pub struct Probes<'a> {
    pub backends: Backends<'a>,
    pub pacer: Pacer<'a>,
    pub tuning: &'a ProbeTuning,
    pub function: &'a str,
    pub dead_letter_queue: &'a str,
    pub results_bucket: &'a str,
    pub user_prefix: &'a str,
}

impl<'a> Probes<'a> {
    /// Long-poll the dead-letter queue. The first message found is deleted so
    /// later probes start clean; elapsed time is measured from `since`.
    pub fn poll_dead_letter(
        &self,
        since: Instant,
        timeout: Duration,
    ) -> Result<ProbeOutcome, PollError> {
        let queue = self.backends.queue;
        let wait_secs = self.tuning.dlq_wait_secs;
        // The receive itself blocks for `wait_secs`; only pace when it doesn't.
        let interval = if wait_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::ZERO
        };

        let outcome = self.pacer.poll_until(since, interval, timeout, || {
            let messages = queue.receive(self.dead_letter_queue, 1, wait_secs)?;
            let Some(message) = messages.first() else {
                return Ok(false);
            };
            // An undeleted message would reappear and be timed as the next
            // unit's arrival; retry once, then fail.
            if let Err(err) = queue.delete(self.dead_letter_queue, &message.receipt_token) {
                warn!(
                    message_id = %message.id,
                    error = %err,
                    "dead letter delete failed; retrying"
                );
                queue.delete(self.dead_letter_queue, &message.receipt_token)?;
            }
            Ok(true)
        })?;

        match outcome.elapsed_secs() {
            Some(elapsed_secs) => info!(elapsed_secs, "dead letter observed"),
            None => warn!(timeout_secs = timeout.as_secs(), "no dead letter within timeout"),
        }
        Ok(outcome)
    }

    /// Poll the result store for `video_id`'s artifact at the configured
    /// interval. Elapsed time is measured from `since`.
    pub fn poll_result_artifact(
        &self,
        video_id: &str,
        since: Instant,
        timeout: Duration,
    ) -> Result<ProbeOutcome, PollError> {
        let store = self.backends.store;
        let key = result_key(self.user_prefix, video_id);
        let interval = Duration::from_secs(self.tuning.result_poll_interval_secs);

        let outcome = self.pacer.poll_until(since, interval, timeout, || {
            store.head(self.results_bucket, &key)
        })?;

        match outcome.elapsed_secs() {
            Some(elapsed_secs) => info!(key = %key, elapsed_secs, "result artifact observed"),
            None => warn!(
                key = %key,
                timeout_secs = timeout.as_secs(),
                "no result artifact within timeout"
            ),
        }
        Ok(outcome)
    }

    /// Seconds from `start` to the earliest minute bucket with a non-zero
    /// error count in `[start, start + window]`. Buckets are aligned to the
    /// metrics period, so an offset before `start` reads as zero.
    pub fn first_error_after(
        &self,
        start: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<f64>, BackendError> {
        let end = start
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let points = self.backends.metrics.query_error_counts(
            self.function,
            start,
            end,
            self.tuning.metrics_period_secs,
        )?;

        let first = points
            .iter()
            .filter(|point| point.sum > 0.0)
            .min_by_key(|point| point.timestamp)
            .map(|point| {
                let offset = (point.timestamp - start).num_milliseconds() as f64 / 1000.0;
                round_tenths(offset.max(0.0))
            });
        debug!(?first, window_secs = window.as_secs(), "first error lookup");
        Ok(first)
    }

    /// Total errors across every bucket in `[start, end]`.
    pub fn error_count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, BackendError> {
        let points = self.backends.metrics.query_error_counts(
            self.function,
            start,
            end,
            self.tuning.metrics_period_secs,
        )?;
        let total: f64 = points.iter().map(|point| point.sum).sum();
        Ok(total.max(0.0).round() as u64)
    }

    pub fn drain_dead_letter(&self) -> Result<usize, BackendError> {
        drain_queue(self.backends.queue, self.dead_letter_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::clock::manual::ManualClock;
    use crate::clock::Clock;
    use crate::testing::FakePipeline;
    use chaos_core::services::ObjectStoreService;

    struct Harness {
        clock: ManualClock,
        pipeline: FakePipeline,
        cancel: CancelToken,
        tuning: ProbeTuning,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::new();
            Self {
                pipeline: FakePipeline::new(clock.clone()),
                clock,
                cancel: CancelToken::new(),
                tuning: ProbeTuning::default(),
            }
        }

        fn probes(&self) -> Probes<'_> {
            Probes {
                backends: self.pipeline.backends(),
                pacer: Pacer::new(&self.clock, &self.cancel),
                tuning: &self.tuning,
                function: FakePipeline::FUNCTION,
                dead_letter_queue: FakePipeline::DLQ,
                results_bucket: FakePipeline::RESULTS,
                user_prefix: "chaos-test@video-analyzer.io",
            }
        }
    }

    #[test]
    fn dead_letter_is_timed_from_since_and_deleted() {
        let harness = Harness::new();
        let since = harness.clock.now();
        harness.pipeline.set_env("CHAOS_FAILURE_RATE", "1.0");
        harness.pipeline.set_queue_visibility(30);
        harness
            .pipeline
            .put(FakePipeline::VIDEOS, "chaos-test@video-analyzer.io/a.mp4", b"clip")
            .expect("put");

        let outcome = harness
            .probes()
            .poll_dead_letter(since, Duration::from_secs(600))
            .expect("poll");

        assert_eq!(outcome, ProbeOutcome::observed(92.0));
        assert_eq!(harness.pipeline.dead_letters_pending(), 0);
    }

    #[test]
    fn undeletable_dead_letter_is_a_backend_error() {
        let harness = Harness::new();
        harness.pipeline.push_dead_letter();
        harness.pipeline.fail_deletes(true);

        let err = harness
            .probes()
            .poll_dead_letter(harness.clock.now(), Duration::from_secs(600))
            .expect_err("delete fails");

        assert!(matches!(err, PollError::Backend(_)));
        assert_eq!(harness.pipeline.dead_letters_pending(), 1);
    }

    #[test]
    fn empty_dead_letter_queue_times_out() {
        let harness = Harness::new();

        let outcome = harness
            .probes()
            .poll_dead_letter(harness.clock.now(), Duration::from_secs(60))
            .expect("poll");

        assert_eq!(outcome, ProbeOutcome::TimedOut);
        assert_eq!(harness.clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn result_artifact_is_found_under_prefix() {
        let harness = Harness::new();
        harness
            .pipeline
            .put(
                FakePipeline::VIDEOS,
                "chaos-test@video-analyzer.io/abc-baseline.mp4",
                b"clip",
            )
            .expect("put");

        let outcome = harness
            .probes()
            .poll_result_artifact(
                "abc-baseline.mp4",
                harness.clock.now(),
                Duration::from_secs(300),
            )
            .expect("poll");

        assert_eq!(outcome, ProbeOutcome::observed(20.0));
    }

    #[test]
    fn missing_result_times_out_at_bound() {
        let harness = Harness::new();
        harness.pipeline.set_healthy(false);

        let outcome = harness
            .probes()
            .poll_result_artifact("nothing.mp4", harness.clock.now(), Duration::from_secs(300))
            .expect("poll");

        assert_eq!(outcome, ProbeOutcome::TimedOut);
        assert_eq!(harness.clock.elapsed(), Duration::from_secs(300));
    }

    #[test]
    fn store_failures_surface_as_backend_errors() {
        let harness = Harness::new();
        harness.pipeline.fail_store(true);

        let err = harness
            .probes()
            .poll_result_artifact("x.mp4", harness.clock.now(), Duration::from_secs(30))
            .expect_err("store down");
        assert!(matches!(err, PollError::Backend(_)));
    }

    #[test]
    fn first_error_after_reports_earliest_nonzero_bucket() {
        let harness = Harness::new();
        let start = harness.clock.wall_now();
        harness.pipeline.set_env("CHAOS_FAILURE_RATE", "1.0");
        harness.pipeline.set_queue_visibility(30);
        harness.clock.advance(Duration::from_secs(125));
        harness
            .pipeline
            .put(FakePipeline::VIDEOS, "p/a.mp4", b"clip")
            .expect("put");
        harness.clock.advance(Duration::from_secs(200));

        let first = harness
            .probes()
            .first_error_after(start, Duration::from_secs(600))
            .expect("metrics");

        // first error at 126s lands in the bucket starting at 120s
        assert_eq!(first, Some(120.0));
        assert_eq!(
            harness
                .probes()
                .error_count(start, harness.clock.wall_now())
                .expect("count"),
            3
        );
    }

    #[test]
    fn no_errors_means_absent_detection() {
        let harness = Harness::new();
        let start = harness.clock.wall_now();
        harness.clock.advance(Duration::from_secs(600));

        let probes = harness.probes();
        assert_eq!(
            probes
                .first_error_after(start, Duration::from_secs(600))
                .expect("metrics"),
            None
        );
        assert_eq!(
            probes.error_count(start, harness.clock.wall_now()).expect("count"),
            0
        );
    }

    #[test]
    fn result_key_appends_json_suffix() {
        assert_eq!(result_key("user", "abc-clip.mp4"), "user/abc-clip.mp4.json");
    }
}
