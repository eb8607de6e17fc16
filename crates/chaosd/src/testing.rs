//! In-memory pipeline used by the orchestrator tests.
//!
//! `FakePipeline` implements all four service contracts and simulates the
//! worker: each upload to the video bucket is resolved against the worker
//! configuration at upload time into a result artifact, dead-letter
//! arrivals, and error datapoints, scheduled on the shared manual clock.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::time::Duration;

use chaos_core::config::ChaosConfig;
use chaos_core::services::{
    BackendError, ComputeConfigService, ConfigUpdate, MetricDatapoint, MetricsService,
    ObjectStoreService, QueueService, ReceivedMessage, UpdateHandle, UpdateStatus, WorkerConfig,
};
use chaos_media::{ClipSpec, WorkloadGenerationError, WorkloadGenerator, WorkloadUnit};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};

use crate::cancel::CancelToken;
use crate::clock::manual::ManualClock;
use crate::clock::Clock;
use crate::pipeline::Backends;

const FAILURE_KEY: &str = "CHAOS_FAILURE_RATE";
const DELAY_KEY: &str = "CHAOS_OPENAI_TIMEOUT_SECS";
const MAX_RECEIVE: u64 = 3;
const HEALTHY_LATENCY_SECS: u64 = 20;

pub fn original_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "OPENAI_API_KEY_PARAM".to_string(),
            "/video-analyzer/openai-key".to_string(),
        ),
        ("RESULTS_BUCKET".to_string(), FakePipeline::RESULTS.to_string()),
    ])
}

pub fn config() -> ChaosConfig {
    let mut config = ChaosConfig::default();
    config.pipeline.function_name = FakePipeline::FUNCTION.to_string();
    config.pipeline.video_bucket = FakePipeline::VIDEOS.to_string();
    config.pipeline.results_bucket = FakePipeline::RESULTS.to_string();
    config.pipeline.queue_url = FakePipeline::QUEUE.to_string();
    config.pipeline.dlq_url = FakePipeline::DLQ.to_string();
    config
}

#[derive(Debug)]
struct Message {
    receipt: String,
    available_at: Duration,
    deleted: bool,
}

#[derive(Debug)]
struct State {
    env: BTreeMap<String, String>,
    time_limit: u64,
    writes: Vec<ConfigUpdate>,
    pending_polls: u32,
    remaining_pending: u32,
    visibility: BTreeMap<String, u64>,
    visibility_calls: usize,
    dead_letters: Vec<Message>,
    deletes: usize,
    receives: usize,
    puts: Vec<(String, String)>,
    objects: Vec<(String, String, Duration)>,
    errors: Vec<Duration>,
    next_id: u64,
}

pub struct FakePipeline {
    clock: ManualClock,
    state: RefCell<State>,
    read_fails: Cell<bool>,
    write_fails: Cell<bool>,
    update_fails: Cell<bool>,
    queue_fails: Cell<bool>,
    delete_fails: Cell<bool>,
    store_fails: Cell<bool>,
    healthy: Cell<bool>,
    cancel_on_put: RefCell<Option<(usize, CancelToken)>>,
    cancel_on_write: RefCell<Option<CancelToken>>,
}

impl FakePipeline {
    pub const FUNCTION: &'static str = "video-analyzer-worker";
    pub const VIDEOS: &'static str = "videos";
    pub const RESULTS: &'static str = "results";
    pub const QUEUE: &'static str = "https://sqs.us-east-1.amazonaws.com/1/video-jobs";
    pub const DLQ: &'static str = "https://sqs.us-east-1.amazonaws.com/1/video-jobs-dlq";

    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: RefCell::new(State {
                env: original_env(),
                time_limit: 900,
                writes: Vec::new(),
                pending_polls: 0,
                remaining_pending: 0,
                visibility: BTreeMap::from([(Self::QUEUE.to_string(), 910)]),
                visibility_calls: 0,
                dead_letters: Vec::new(),
                deletes: 0,
                receives: 0,
                puts: Vec::new(),
                objects: Vec::new(),
                errors: Vec::new(),
                next_id: 0,
            }),
            read_fails: Cell::new(false),
            write_fails: Cell::new(false),
            update_fails: Cell::new(false),
            queue_fails: Cell::new(false),
            delete_fails: Cell::new(false),
            store_fails: Cell::new(false),
            healthy: Cell::new(true),
            cancel_on_put: RefCell::new(None),
            cancel_on_write: RefCell::new(None),
        }
    }

    pub fn backends(&self) -> Backends<'_> {
        Backends {
            compute: self,
            queue: self,
            store: self,
            metrics: self,
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.read_fails.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.write_fails.set(fail);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.update_fails.set(fail);
    }

    pub fn fail_queue(&self, fail: bool) {
        self.queue_fails.set(fail);
    }

    /// Only `delete` fails; receives keep working.
    pub fn fail_deletes(&self, fail: bool) {
        self.delete_fails.set(fail);
    }

    pub fn fail_store(&self, fail: bool) {
        self.store_fails.set(fail);
    }

    /// An unhealthy worker never writes results.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.set(healthy);
    }

    /// Status polls answered `Pending` after each write.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.borrow_mut().pending_polls = polls;
    }

    pub fn set_env(&self, key: &str, value: &str) {
        self.state
            .borrow_mut()
            .env
            .insert(key.to_string(), value.to_string());
    }

    /// Main-queue visibility, set without counting as a call.
    pub fn set_queue_visibility(&self, seconds: u64) {
        self.state
            .borrow_mut()
            .visibility
            .insert(Self::QUEUE.to_string(), seconds);
    }

    /// Cancel `token` when the `nth` upload (1-based) lands.
    pub fn cancel_on_put(&self, nth: usize, token: CancelToken) {
        *self.cancel_on_put.borrow_mut() = Some((nth, token));
    }

    /// The next config write cancels `token` and then fails, the way an
    /// interrupted CLI child does.
    pub fn cancel_on_write(&self, token: CancelToken) {
        *self.cancel_on_write.borrow_mut() = Some(token);
    }

    pub fn push_dead_letter(&self) {
        let now = self.clock.elapsed();
        let mut state = self.state.borrow_mut();
        state.schedule_dead_letter(now);
    }

    pub fn dead_letters_pending(&self) -> usize {
        self.state
            .borrow()
            .dead_letters
            .iter()
            .filter(|message| !message.deleted)
            .count()
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        self.state.borrow().env.clone()
    }

    pub fn time_limit(&self) -> u64 {
        self.state.borrow().time_limit
    }

    pub fn writes(&self) -> Vec<ConfigUpdate> {
        self.state.borrow().writes.clone()
    }

    pub fn visibility_of(&self, queue_id: &str) -> Option<u64> {
        self.state.borrow().visibility.get(queue_id).copied()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.borrow().puts.clone()
    }

    pub fn result_count(&self) -> usize {
        let now = self.clock.elapsed();
        self.state
            .borrow()
            .objects
            .iter()
            .filter(|(bucket, _, at)| bucket == Self::RESULTS && *at <= now)
            .count()
    }

    /// Every call that changes pipeline state, plus queue receives.
    pub fn mutating_calls(&self) -> usize {
        let state = self.state.borrow();
        state.writes.len()
            + state.visibility_calls
            + state.deletes
            + state.receives
            + state.puts.len()
    }

    fn backend_error(service: &'static str, operation: &str) -> BackendError {
        BackendError::request(service, operation, "simulated outage")
    }

    fn simulate_worker(&self, key: &str) {
        let now = self.clock.elapsed();
        let mut state = self.state.borrow_mut();
        let failure = state
            .env
            .get(FAILURE_KEY)
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0);
        let delay = state
            .env
            .get(DELAY_KEY)
            .and_then(|value| value.parse::<u64>().ok());
        let visibility = state.visibility.get(Self::QUEUE).copied().unwrap_or(910);
        let limit = state.time_limit;
        let result_key = format!("{key}.json");

        if failure >= 1.0 {
            for attempt in 0..MAX_RECEIVE {
                state.errors.push(now + secs(attempt * visibility + 1));
            }
            state.schedule_dead_letter(now + secs(MAX_RECEIVE * visibility + 2));
        } else if failure > 0.0 {
            state.errors.push(now + secs(1));
            state.objects.push((
                Self::RESULTS.to_string(),
                result_key,
                now + secs(visibility + HEALTHY_LATENCY_SECS),
            ));
        } else if delay.is_some_and(|delay| delay > limit) {
            for attempt in 0..MAX_RECEIVE {
                state.errors.push(now + secs(attempt * visibility + limit));
            }
            state.schedule_dead_letter(now + secs(MAX_RECEIVE * visibility));
        } else if self.healthy.get() {
            state.objects.push((
                Self::RESULTS.to_string(),
                result_key,
                now + secs(HEALTHY_LATENCY_SECS),
            ));
        }
    }

    fn wall_at(&self, offset: Duration) -> DateTime<Utc> {
        let now = self.clock.elapsed();
        let wall_now = self.clock.wall_now();
        if offset >= now {
            wall_now + to_chrono(offset - now)
        } else {
            wall_now - to_chrono(now - offset)
        }
    }
}

impl State {
    fn schedule_dead_letter(&mut self, available_at: Duration) {
        self.next_id += 1;
        self.dead_letters.push(Message {
            receipt: format!("receipt-{}", self.next_id),
            available_at,
            deleted: false,
        });
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero())
}

impl ComputeConfigService for FakePipeline {
    fn read(&self, _function_id: &str) -> Result<WorkerConfig, BackendError> {
        if self.read_fails.get() {
            return Err(Self::backend_error("lambda", "get-function-configuration"));
        }
        let state = self.state.borrow();
        Ok(WorkerConfig {
            env_vars: state.env.clone(),
            time_limit_secs: state.time_limit,
        })
    }

    fn write(
        &self,
        function_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateHandle, BackendError> {
        if let Some(token) = self.cancel_on_write.borrow_mut().take() {
            token.cancel();
            return Err(Self::backend_error("lambda", "update-function-configuration"));
        }
        if self.write_fails.get() {
            return Err(Self::backend_error("lambda", "update-function-configuration"));
        }
        let mut state = self.state.borrow_mut();
        if let Some(env) = &update.env_vars {
            state.env = env.clone();
        }
        if let Some(limit) = update.time_limit_secs {
            state.time_limit = limit;
        }
        state.writes.push(update.clone());
        state.remaining_pending = state.pending_polls;
        Ok(UpdateHandle(function_id.to_string()))
    }

    fn status(&self, _handle: &UpdateHandle) -> Result<UpdateStatus, BackendError> {
        if self.update_fails.get() {
            return Ok(UpdateStatus::Failed);
        }
        let mut state = self.state.borrow_mut();
        if state.remaining_pending > 0 {
            state.remaining_pending -= 1;
            Ok(UpdateStatus::Pending)
        } else {
            Ok(UpdateStatus::Succeeded)
        }
    }
}

impl QueueService for FakePipeline {
    fn set_visibility_timeout(&self, queue_id: &str, seconds: u64) -> Result<(), BackendError> {
        if self.queue_fails.get() {
            return Err(Self::backend_error("sqs", "set-queue-attributes"));
        }
        let mut state = self.state.borrow_mut();
        state.visibility.insert(queue_id.to_string(), seconds);
        state.visibility_calls += 1;
        Ok(())
    }

    /// Long-poll: if nothing is visible yet, the clock advances to the next
    /// arrival or by `wait_secs`, whichever comes first.
    fn receive(
        &self,
        queue_id: &str,
        max_messages: u32,
        wait_secs: u64,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        if self.queue_fails.get() {
            return Err(Self::backend_error("sqs", "receive-message"));
        }
        self.state.borrow_mut().receives += 1;
        if queue_id != Self::DLQ {
            self.clock.advance(secs(wait_secs));
            return Ok(Vec::new());
        }

        let now = self.clock.elapsed();
        let next = self
            .state
            .borrow()
            .dead_letters
            .iter()
            .filter(|message| !message.deleted)
            .map(|message| message.available_at)
            .min();
        match next {
            Some(at) if at <= now => {}
            Some(at) if at <= now + secs(wait_secs) => self.clock.advance(at - now),
            _ => {
                self.clock.advance(secs(wait_secs));
                return Ok(Vec::new());
            }
        }

        let now = self.clock.elapsed();
        Ok(self
            .state
            .borrow()
            .dead_letters
            .iter()
            .filter(|message| !message.deleted && message.available_at <= now)
            .take(max_messages as usize)
            .map(|message| ReceivedMessage {
                id: message.receipt.replace("receipt", "message"),
                receipt_token: message.receipt.clone(),
            })
            .collect())
    }

    fn delete(&self, _queue_id: &str, receipt_token: &str) -> Result<(), BackendError> {
        if self.queue_fails.get() || self.delete_fails.get() {
            return Err(Self::backend_error("sqs", "delete-message"));
        }
        let mut state = self.state.borrow_mut();
        state.deletes += 1;
        for message in &mut state.dead_letters {
            if message.receipt == receipt_token {
                message.deleted = true;
            }
        }
        Ok(())
    }
}

impl ObjectStoreService for FakePipeline {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        if self.store_fails.get() {
            return Err(Self::backend_error("s3", "put-object"));
        }
        assert!(!bytes.is_empty(), "uploads carry a clip");
        let uploads = {
            let mut state = self.state.borrow_mut();
            state.puts.push((bucket.to_string(), key.to_string()));
            state.puts.len()
        };
        if bucket == Self::VIDEOS {
            self.simulate_worker(key);
        }
        if let Some((nth, token)) = self.cancel_on_put.borrow().as_ref() {
            if uploads >= *nth {
                token.cancel();
            }
        }
        Ok(())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        if self.store_fails.get() {
            return Err(Self::backend_error("s3", "head-object"));
        }
        let now = self.clock.elapsed();
        Ok(self
            .state
            .borrow()
            .objects
            .iter()
            .any(|(b, k, at)| b == bucket && k == key && *at <= now))
    }
}

impl MetricsService for FakePipeline {
    /// Errors bucketed by minute, like the real metrics backend. Window
    /// edges are exact so neighbouring experiments never bleed together.
    fn query_error_counts(
        &self,
        _function_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _period_secs: u64,
    ) -> Result<Vec<MetricDatapoint>, BackendError> {
        let errors = self.state.borrow().errors.clone();
        let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for offset in errors {
            if offset > self.clock.elapsed() {
                continue;
            }
            let at = self.wall_at(offset);
            let minute = at
                .with_second(0)
                .and_then(|at| at.with_nanosecond(0))
                .unwrap_or(at);
            if at < start || at > end {
                continue;
            }
            *buckets.entry(minute).or_default() += 1.0;
        }
        Ok(buckets
            .into_iter()
            .map(|(timestamp, sum)| MetricDatapoint { timestamp, sum })
            .collect())
    }
}

/// Generator that never shells out.
#[derive(Debug, Default)]
pub struct FakeGenerator {
    failing: Cell<bool>,
    generated: RefCell<Vec<ClipSpec>>,
}

impl FakeGenerator {
    pub fn failing() -> Self {
        let generator = Self::default();
        generator.failing.set(true);
        generator
    }

    pub fn generated(&self) -> Vec<ClipSpec> {
        self.generated.borrow().clone()
    }
}

impl WorkloadGenerator for FakeGenerator {
    fn generate(&self, spec: &ClipSpec) -> Result<WorkloadUnit, WorkloadGenerationError> {
        if self.failing.get() {
            return Err(WorkloadGenerationError::EmptyOutput {
                path: spec.file_name(),
            });
        }
        self.generated.borrow_mut().push(spec.clone());
        Ok(WorkloadUnit {
            file_name: spec.file_name(),
            bytes: format!("mp4:{}", spec.color).into_bytes(),
        })
    }
}
