//! Handles to the four services the pipeline is reached through.

use chaos_core::services::{
    BackendError, ComputeConfigService, MetricsService, ObjectStoreService, QueueService,
};
use tracing::debug;

/// Upper bound on receive batches per drain, so a queue that keeps filling
/// cannot stall cleanup.
pub const MAX_DRAIN_BATCHES: usize = 50;
const DRAIN_BATCH_SIZE: u32 = 10;
const DRAIN_WAIT_SECS: u64 = 1;

#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub compute: &'a dyn ComputeConfigService,
    pub queue: &'a dyn QueueService,
    pub store: &'a dyn ObjectStoreService,
    pub metrics: &'a dyn MetricsService,
}

impl std::fmt::Debug for Backends<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Receive and delete until a receive comes back empty. Returns the number
/// of messages removed.
pub fn drain_queue(queue: &dyn QueueService, queue_id: &str) -> Result<usize, BackendError> {
    let mut drained = 0;
    for _ in 0..MAX_DRAIN_BATCHES {
        let messages = queue.receive(queue_id, DRAIN_BATCH_SIZE, DRAIN_WAIT_SECS)?;
        if messages.is_empty() {
            break;
        }
        for message in &messages {
            queue.delete(queue_id, &message.receipt_token)?;
            drained += 1;
        }
    }
    debug!(queue = queue_id, drained, "drained queue");
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::testing::FakePipeline;

    #[test]
    fn drain_removes_every_visible_message() {
        let pipeline = FakePipeline::new(ManualClock::new());
        for _ in 0..13 {
            pipeline.push_dead_letter();
        }

        let drained = drain_queue(&pipeline, FakePipeline::DLQ).expect("drain");

        assert_eq!(drained, 13);
        assert_eq!(pipeline.dead_letters_pending(), 0);
    }

    #[test]
    fn drain_of_empty_queue_is_zero() {
        let pipeline = FakePipeline::new(ManualClock::new());
        assert_eq!(drain_queue(&pipeline, FakePipeline::DLQ).expect("drain"), 0);
    }

    #[test]
    fn drain_propagates_receive_failures() {
        let pipeline = FakePipeline::new(ManualClock::new());
        pipeline.fail_queue(true);
        assert!(drain_queue(&pipeline, FakePipeline::DLQ).is_err());
    }
}
