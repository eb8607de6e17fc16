//! Bounded polling shared by every probe.

use std::time::{Duration, Instant};

use chaos_core::services::BackendError;
use chaos_core::types::ProbeOutcome;

use crate::cancel::CancelToken;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("cancelled by operator")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Clock plus cancellation flag; everything that waits goes through here.
#[derive(Clone, Copy)]
pub struct Pacer<'a> {
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancelToken,
}

impl<'a> Pacer<'a> {
    pub fn new(clock: &'a dyn Clock, cancel: &'a CancelToken) -> Self {
        Self { clock, cancel }
    }

    pub fn check(&self) -> Result<(), PollError> {
        if self.cancel.is_cancelled() {
            Err(PollError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep in one-second slices so a signal interrupts long settle waits.
    pub fn pause(&self, duration: Duration) -> Result<(), PollError> {
        let slice = Duration::from_secs(1);
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check()?;
            let step = remaining.min(slice);
            self.clock.sleep(step);
            remaining -= step;
        }
        self.check()
    }

    /// Evaluate `predicate` until it holds or `timeout` (measured from this
    /// call) passes. Elapsed time in the outcome is measured from `since`,
    /// which is usually the moment the probed work entered the pipeline.
    ///
    /// A zero `interval` is only sensible when the predicate itself blocks
    /// (a long-poll receive).
    pub fn poll_until<F>(
        &self,
        since: Instant,
        interval: Duration,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<ProbeOutcome, PollError>
    where
        F: FnMut() -> Result<bool, BackendError>,
    {
        let deadline = self.clock.now() + timeout;
        while self.clock.now() < deadline {
            self.check()?;
            if predicate()? {
                let elapsed = self.clock.now().saturating_duration_since(since);
                return Ok(ProbeOutcome::observed(elapsed.as_secs_f64()));
            }
            if !interval.is_zero() {
                self.clock.sleep(interval);
            }
        }
        Ok(ProbeOutcome::TimedOut)
    }
}
