//! Run configuration: pipeline addressing plus chaos and probe tunables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_FUNCTION_NAME: &str = "LAMBDA_NAME";
pub const ENV_VIDEO_BUCKET: &str = "VIDEO_BUCKET_NAME";
pub const ENV_RESULTS_BUCKET: &str = "RESULTS_BUCKET_NAME";
pub const ENV_QUEUE_URL: &str = "SQS_QUEUE_URL";
pub const ENV_DLQ_URL: &str = "SQS_DLQ_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required addressing configuration: {}", keys.join(", "))]
    MissingAddressing { keys: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chaos: ChaosTuning,
    #[serde(default)]
    pub probes: ProbeTuning,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Where the pipeline under test lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub region: String,
    pub function_name: String,
    pub video_bucket: String,
    pub results_bucket: String,
    pub queue_url: String,
    pub dlq_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            function_name: "video-analyzer-worker".to_string(),
            video_bucket: String::new(),
            results_bucket: String::new(),
            queue_url: String::new(),
            dlq_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosTuning {
    /// Main queue visibility timeout restored at run end.
    pub original_visibility_timeout_secs: u64,
    pub crash_visibility_timeout_secs: u64,
    pub hang_time_limit_secs: u64,
    pub induced_delay_secs: u64,
    pub visibility_margin_secs: u64,
    /// The queue's redrive `maxReceiveCount`.
    pub max_receive_count: u32,
    pub reporting_failure_probability: f64,
    pub failure_rate_units: usize,
    pub reporting_units: usize,
    pub failure_rate_env_key: String,
    pub induced_delay_env_key: String,
}

impl Default for ChaosTuning {
    fn default() -> Self {
        Self {
            original_visibility_timeout_secs: 910,
            crash_visibility_timeout_secs: 30,
            hang_time_limit_secs: 30,
            induced_delay_secs: 60,
            visibility_margin_secs: 5,
            max_receive_count: 3,
            reporting_failure_probability: 0.5,
            failure_rate_units: 3,
            reporting_units: 3,
            failure_rate_env_key: "CHAOS_FAILURE_RATE".to_string(),
            induced_delay_env_key: "CHAOS_OPENAI_TIMEOUT_SECS".to_string(),
        }
    }
}

impl ChaosTuning {
    pub fn chaos_env_keys(&self) -> [&str; 2] {
        [
            self.failure_rate_env_key.as_str(),
            self.induced_delay_env_key.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeTuning {
    /// Floor for every dead-letter probe timeout.
    pub dlq_poll_timeout_secs: u64,
    pub dlq_wait_secs: u64,
    pub dlq_slack_secs: u64,
    pub result_poll_interval_secs: u64,
    pub result_timeout_secs: u64,
    pub metrics_window_secs: u64,
    pub metrics_extra_window_secs: u64,
    pub metrics_period_secs: u64,
    pub propagation_attempts: u32,
    pub propagation_interval_secs: u64,
    pub upload_spacing_secs: u64,
    pub error_rate_settle_secs: u64,
    pub recovery_settle_secs: u64,
}

impl Default for ProbeTuning {
    fn default() -> Self {
        Self {
            dlq_poll_timeout_secs: 600,
            dlq_wait_secs: 5,
            dlq_slack_secs: 60,
            result_poll_interval_secs: 5,
            result_timeout_secs: 300,
            metrics_window_secs: 600,
            metrics_extra_window_secs: 120,
            metrics_period_secs: 60,
            propagation_attempts: 40,
            propagation_interval_secs: 2,
            upload_spacing_secs: 2,
            error_rate_settle_secs: 30,
            recovery_settle_secs: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Object key prefix; the worker files results under the same prefix.
    pub user_prefix: String,
    pub clip_duration_secs: u64,
    pub ffmpeg_binary: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            user_prefix: "chaos-test@video-analyzer.io".to_string(),
            clip_duration_secs: 2,
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl ChaosConfig {
    /// Overlay addressing keys from the environment. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pipeline = &mut self.pipeline;
        let fields: [(&str, &mut String); 6] = [
            (ENV_REGION, &mut pipeline.region),
            (ENV_FUNCTION_NAME, &mut pipeline.function_name),
            (ENV_VIDEO_BUCKET, &mut pipeline.video_bucket),
            (ENV_RESULTS_BUCKET, &mut pipeline.results_bucket),
            (ENV_QUEUE_URL, &mut pipeline.queue_url),
            (ENV_DLQ_URL, &mut pipeline.dlq_url),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key) {
                let value = value.trim();
                if !value.is_empty() {
                    *slot = value.to_string();
                }
            }
        }
    }

    /// Environment key names for every required address that is still empty.
    pub fn missing_addressing(&self) -> Vec<String> {
        let pipeline = &self.pipeline;
        [
            (ENV_VIDEO_BUCKET, &pipeline.video_bucket),
            (ENV_RESULTS_BUCKET, &pipeline.results_bucket),
            (ENV_QUEUE_URL, &pipeline.queue_url),
            (ENV_DLQ_URL, &pipeline.dlq_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key.to_string())
        .collect()
    }

    pub fn require_addressing(&self) -> Result<(), ConfigError> {
        let keys = self.missing_addressing();
        if keys.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingAddressing { keys })
        }
    }
}

pub fn parse_config(contents: &str) -> Result<ChaosConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<ChaosConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}
