//! Validation for run configuration.

use serde::{Deserialize, Serialize};

use crate::config::ChaosConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

fn error(code: &'static str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        level: ValidationLevel::Error,
        code,
        message: message.into(),
    }
}

fn warning(code: &'static str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        level: ValidationLevel::Warning,
        code,
        message: message.into(),
    }
}

impl Validate for ChaosConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let chaos = &self.chaos;
        let probes = &self.probes;

        if chaos.max_receive_count == 0 {
            issues.push(error(
                "chaos.max_receive_count.zero",
                "max_receive_count must match the queue redrive policy and be greater than zero",
            ));
        }

        if !(0.0..=1.0).contains(&chaos.reporting_failure_probability) {
            issues.push(error(
                "chaos.reporting_failure_probability.range",
                format!(
                    "reporting failure probability {} is outside [0, 1]",
                    chaos.reporting_failure_probability
                ),
            ));
        }

        if chaos.crash_visibility_timeout_secs == 0 {
            issues.push(error(
                "chaos.crash_visibility_timeout.zero",
                "crash-phase visibility timeout cannot be 0",
            ));
        }

        if chaos.hang_time_limit_secs == 0 {
            issues.push(error(
                "chaos.hang_time_limit.zero",
                "hang-phase execution time limit cannot be 0",
            ));
        }

        // Without this the worker finishes normally and nothing is retried.
        if chaos.induced_delay_secs <= chaos.hang_time_limit_secs {
            issues.push(error(
                "chaos.induced_delay.not_exceeding_limit",
                format!(
                    "induced delay {}s must exceed the hang time limit {}s",
                    chaos.induced_delay_secs, chaos.hang_time_limit_secs
                ),
            ));
        }

        if chaos.visibility_margin_secs == 0 {
            issues.push(error(
                "chaos.visibility_margin.zero",
                "visibility margin must be greater than zero so redelivery follows forced termination",
            ));
        }

        if chaos.failure_rate_units == 0 {
            issues.push(warning(
                "chaos.failure_rate_units.zero",
                "failure-rate phase uploads no units; DLQ timing will be empty",
            ));
        }

        if chaos.failure_rate_env_key.trim().is_empty()
            || chaos.induced_delay_env_key.trim().is_empty()
        {
            issues.push(error(
                "chaos.env_key.empty",
                "chaos environment keys must not be empty",
            ));
        } else if chaos.failure_rate_env_key == chaos.induced_delay_env_key {
            issues.push(error(
                "chaos.env_key.duplicate",
                "failure-rate and induced-delay env keys must differ",
            ));
        }

        if chaos.original_visibility_timeout_secs <= chaos.hang_time_limit_secs {
            issues.push(warning(
                "chaos.original_visibility.short",
                format!(
                    "original visibility timeout {}s is not longer than the hang time limit",
                    chaos.original_visibility_timeout_secs
                ),
            ));
        }

        for (code, value, name) in [
            (
                "probes.result_poll_interval.zero",
                probes.result_poll_interval_secs,
                "result poll interval",
            ),
            (
                "probes.propagation_interval.zero",
                probes.propagation_interval_secs,
                "propagation interval",
            ),
            (
                "probes.metrics_period.zero",
                probes.metrics_period_secs,
                "metrics period",
            ),
            (
                "probes.result_timeout.zero",
                probes.result_timeout_secs,
                "result timeout",
            ),
        ] {
            if value == 0 {
                issues.push(error(code, format!("{name} cannot be 0")));
            }
        }

        if probes.propagation_attempts == 0 {
            issues.push(error(
                "probes.propagation_attempts.zero",
                "propagation attempts cannot be 0",
            ));
        }

        if probes.result_poll_interval_secs > probes.result_timeout_secs {
            issues.push(error(
                "probes.result_poll_interval.exceeds_timeout",
                "result poll interval exceeds the result timeout",
            ));
        }

        if probes.metrics_period_secs % 60 != 0 {
            issues.push(warning(
                "probes.metrics_period.not_minute",
                "metrics period is not a whole number of minutes; buckets may be rejected",
            ));
        }

        issues
    }
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let issues = ChaosConfig::default().validate();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn delay_within_limit_is_rejected() {
        let mut config = ChaosConfig::default();
        config.chaos.induced_delay_secs = 30;
        config.chaos.hang_time_limit_secs = 30;

        let issues = config.validate();
        assert!(has_errors(&issues));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "chaos.induced_delay.not_exceeding_limit"));
    }

    #[test]
    fn probability_out_of_range_is_rejected() {
        let mut config = ChaosConfig::default();
        config.chaos.reporting_failure_probability = 1.5;
        assert!(config
            .validate()
            .iter()
            .any(|issue| issue.code == "chaos.reporting_failure_probability.range"));
    }

    #[test]
    fn duplicate_env_keys_are_rejected() {
        let mut config = ChaosConfig::default();
        config.chaos.induced_delay_env_key = config.chaos.failure_rate_env_key.clone();
        assert!(config
            .validate()
            .iter()
            .any(|issue| issue.code == "chaos.env_key.duplicate"));
    }

    #[test]
    fn zero_units_is_only_a_warning() {
        let mut config = ChaosConfig::default();
        config.chaos.failure_rate_units = 0;
        let issues = config.validate();
        assert!(!has_errors(&issues));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, ValidationLevel::Warning);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = ChaosConfig::default();
        config.probes.result_poll_interval_secs = 0;
        config.probes.propagation_attempts = 0;
        let codes = config
            .validate()
            .into_iter()
            .map(|issue| issue.code)
            .collect::<Vec<_>>();
        assert!(codes.contains(&"probes.result_poll_interval.zero"));
        assert!(codes.contains(&"probes.propagation_attempts.zero"));
    }
}
