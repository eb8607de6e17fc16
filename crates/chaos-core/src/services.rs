//! Contracts for the external services the orchestrator drives.
//!
//! Each service is reached through a narrow request/response trait so the
//! orchestrator can run against AWS or against in-memory fakes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{service} request failed ({operation}): {message}")]
    Request {
        service: &'static str,
        operation: String,
        message: String,
    },
    #[error("{service} returned an unexpected response ({operation}): {context}")]
    Parse {
        service: &'static str,
        operation: String,
        context: String,
    },
}

impl BackendError {
    pub fn request(
        service: &'static str,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BackendError::Request {
            service,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn parse(
        service: &'static str,
        operation: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        BackendError::Parse {
            service,
            operation: operation.into(),
            context: context.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub env_vars: BTreeMap<String, String>,
    pub time_limit_secs: u64,
}

/// Partial configuration update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub env_vars: Option<BTreeMap<String, String>>,
    pub time_limit_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateHandle(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: String,
    pub receipt_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDatapoint {
    pub timestamp: DateTime<Utc>,
    pub sum: f64,
}

pub trait ComputeConfigService {
    fn read(&self, function_id: &str) -> Result<WorkerConfig, BackendError>;
    fn write(&self, function_id: &str, update: &ConfigUpdate)
        -> Result<UpdateHandle, BackendError>;
    fn status(&self, handle: &UpdateHandle) -> Result<UpdateStatus, BackendError>;
}

pub trait QueueService {
    fn set_visibility_timeout(&self, queue_id: &str, seconds: u64) -> Result<(), BackendError>;
    fn receive(
        &self,
        queue_id: &str,
        max_messages: u32,
        wait_secs: u64,
    ) -> Result<Vec<ReceivedMessage>, BackendError>;
    fn delete(&self, queue_id: &str, receipt_token: &str) -> Result<(), BackendError>;
}

pub trait ObjectStoreService {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError>;
    fn head(&self, bucket: &str, key: &str) -> Result<bool, BackendError>;
}

pub trait MetricsService {
    fn query_error_counts(
        &self,
        function_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period_secs: u64,
    ) -> Result<Vec<MetricDatapoint>, BackendError>;
}
