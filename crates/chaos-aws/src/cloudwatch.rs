//! Metrics contract over `aws cloudwatch get-metric-statistics`.

use chaos_core::services::{BackendError, MetricDatapoint, MetricsService};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::command::AwsCli;

const SERVICE: &str = "cloudwatch";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricStatistics {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datapoint {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    sum: f64,
}

#[derive(Debug, Clone)]
pub struct CloudWatchMetrics {
    pub cli: AwsCli,
    pub namespace: String,
    pub metric_name: String,
}

impl CloudWatchMetrics {
    pub fn new(cli: AwsCli) -> Self {
        Self {
            cli,
            namespace: "AWS/Lambda".to_string(),
            metric_name: "Errors".to_string(),
        }
    }
}

impl MetricsService for CloudWatchMetrics {
    fn query_error_counts(
        &self,
        function_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period_secs: u64,
    ) -> Result<Vec<MetricDatapoint>, BackendError> {
        let operation = "get-metric-statistics";
        let stats: MetricStatistics = self
            .cli
            .call_json(
                SERVICE,
                operation,
                &[
                    "--namespace".to_string(),
                    self.namespace.clone(),
                    "--metric-name".to_string(),
                    self.metric_name.clone(),
                    "--dimensions".to_string(),
                    format!("Name=FunctionName,Value={function_id}"),
                    "--start-time".to_string(),
                    start.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "--end-time".to_string(),
                    end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "--period".to_string(),
                    period_secs.to_string(),
                    "--statistics".to_string(),
                    "Sum".to_string(),
                ],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))?;

        let mut points = stats
            .datapoints
            .into_iter()
            .map(|point| MetricDatapoint {
                timestamp: point.timestamp,
                sum: point.sum,
            })
            .collect::<Vec<_>>();
        // CloudWatch does not order datapoints.
        points.sort_by_key(|point| point.timestamp);
        Ok(points)
    }
}
