//! Report rendering. Both documents are pure functions of the run report
//! and the configuration it ran with.

use std::fs;
use std::path::{Path, PathBuf};

use chaos_core::config::ChaosConfig;
use chaos_core::types::{
    DlqTimingRun, ErrorRateRun, PhaseId, PhaseMeasurements, PhaseResult, ProbeOutcome,
    RestoreStatus, RunReport,
};

use crate::injector::{expected_hang_bound_secs, format_probability};
use crate::phases::{failure_rate_probe_timeout_secs, hang_probe_timeout_secs};

const NOT_AVAILABLE: &str = "N/A";

const RESILIENCE_GAPS: [(&str, &str, &str); 5] = [
    (
        "No DLQ CloudWatch alarm",
        "Critical",
        "Alarm on DLQ `ApproximateNumberOfMessagesVisible` > 0 routed to SNS and on-call",
    ),
    (
        "OpenAI client has no hard timeout",
        "High",
        "Set an explicit client timeout below the worker time limit; add exponential backoff",
    ),
    (
        "No `ReportBatchItemFailures` on the SQS trigger",
        "Medium",
        "Enable partial batch failure so only failed messages are re-queued",
    ),
    (
        "No circuit breaker for OpenAI",
        "Medium",
        "Parameter-store flag to skip OpenAI during an outage and write a degraded result",
    ),
    (
        "No DLQ redrive automation",
        "Low",
        "Function or state machine that replays DLQ messages after an incident",
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to serialize report: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create report directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

impl ReportPaths {
    pub fn for_run(dir: &Path, run_id: &str) -> Self {
        Self {
            json: dir.join(format!("chaos_report_{run_id}.json")),
            markdown: dir.join(format!("chaos_report_{run_id}.md")),
        }
    }
}

pub fn render_json(report: &RunReport) -> Result<String, ReportError> {
    serde_json::to_string_pretty(report).map_err(|source| ReportError::Serialize { source })
}

pub fn render_markdown(report: &RunReport, config: &ChaosConfig) -> Result<String, ReportError> {
    let raw_json = render_json(report)?;
    let mut lines = vec![
        "# Chaos Engineering Report".to_string(),
        String::new(),
        format!("**Run ID:** `{}`", report.run_id),
        format!("**Timestamp:** `{}`", report.timestamp.to_rfc3339()),
        format!(
            "**Pipeline:** S3 -> SQS -> Lambda (`{}`) -> OpenAI -> S3",
            config.pipeline.function_name
        ),
        format!(
            "**Mode:** {}",
            if report.dry_run { "dry run (nothing applied)" } else { "live" }
        ),
    ];
    if report.interrupted {
        lines.push(String::new());
        lines.push(
            "> **Interrupted:** cancelled by operator before every phase finished.".to_string(),
        );
    }

    lines.extend(section("Executive Summary"));
    lines.push("| Phase | Status | Primary Metric | Detection |".to_string());
    lines.push("|-------|--------|----------------|-----------|".to_string());
    lines.extend(report.phases.iter().map(summary_row));
    let errors: Vec<String> = report
        .phases
        .iter()
        .filter_map(|result| {
            result
                .error
                .as_ref()
                .map(|error| format!("- **{}**: {error}", result.phase))
        })
        .collect();
    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("Phase errors:".to_string());
        lines.push(String::new());
        lines.extend(errors);
    }

    lines.extend(section("Restoration"));
    lines.extend(restoration(report));

    lines.extend(section("Phase Findings"));
    lines.extend(failure_rate_findings(
        report.phase(PhaseId::FailureRate),
        config,
    ));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
    lines.extend(hang_findings(report, config));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
    lines.extend(recovery_findings(report.phase(PhaseId::Recovery)));

    lines.extend(section("Resilience Gaps"));
    lines.push("| # | Gap | Severity | Recommendation |".to_string());
    lines.push("|---|-----|----------|----------------|".to_string());
    for (index, (gap, severity, recommendation)) in RESILIENCE_GAPS.iter().enumerate() {
        lines.push(format!(
            "| {} | {gap} | **{severity}** | {recommendation} |",
            index + 1
        ));
    }

    lines.extend(section("Raw Data"));
    lines.push("```json".to_string());
    lines.push(raw_json);
    lines.push("```".to_string());
    lines.push(String::new());
    Ok(lines.join("\n"))
}

/// Write both documents into `dir`, named after the run id.
pub fn write_reports(
    report: &RunReport,
    config: &ChaosConfig,
    dir: &Path,
) -> Result<ReportPaths, ReportError> {
    let json = render_json(report)?;
    let markdown = render_markdown(report, config)?;
    fs::create_dir_all(dir).map_err(|source| ReportError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let paths = ReportPaths::for_run(dir, report.run_id.as_ref());
    for (path, contents) in [(&paths.json, json), (&paths.markdown, markdown)] {
        fs::write(path, contents).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
    }
    Ok(paths)
}

fn section(title: &str) -> [String; 5] {
    [
        String::new(),
        "---".to_string(),
        String::new(),
        format!("## {title}"),
        String::new(),
    ]
}

fn secs(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |secs| format!("{secs:.1}s"))
}

fn probe(outcome: Option<ProbeOutcome>) -> String {
    secs(outcome.and_then(ProbeOutcome::elapsed_secs))
}

fn summary_row(result: &PhaseResult) -> String {
    let (metric, detection) = match &result.measurements {
        PhaseMeasurements::Baseline { result } => {
            (format!("Result latency {}", probe(*result)), "--".to_string())
        }
        PhaseMeasurements::FailureRate { dlq_timing, .. } => {
            let timing = dlq_timing.as_ref();
            let summary = timing.map(|run| &run.summary);
            (
                format!(
                    "Avg DLQ routing {} (min {} / max {})",
                    secs(summary.and_then(|s| s.mean_secs)),
                    secs(summary.and_then(|s| s.min_secs)),
                    secs(summary.and_then(|s| s.max_secs)),
                ),
                format!(
                    "CW detection {}",
                    secs(timing.and_then(|run| run.detection_secs))
                ),
            )
        }
        PhaseMeasurements::DependencyHang {
            expected_dlq_bound_secs,
            dlq_routing,
            detection_secs,
            ..
        } => (
            format!(
                "DLQ routing {} (bound {expected_dlq_bound_secs}s)",
                probe(*dlq_routing)
            ),
            format!("CW detection {}", secs(*detection_secs)),
        ),
        PhaseMeasurements::Recovery { result, .. } => (
            format!("Time to first success {}", probe(*result)),
            "--".to_string(),
        ),
        PhaseMeasurements::None => (NOT_AVAILABLE.to_string(), "--".to_string()),
    };
    format!(
        "| {} (Phase {}) | {} | {metric} | {detection} |",
        result.phase.title(),
        result.phase.ordinal(),
        result.status
    )
}

fn restoration(report: &RunReport) -> Vec<String> {
    let restore = &report.restore;
    let mut lines = vec![
        "| Status | Drained DLQ messages |".to_string(),
        "|--------|----------------------|".to_string(),
        format!(
            "| {} | {} |",
            restore_status(restore.status),
            restore.drained_messages
        ),
    ];
    if restore.status == RestoreStatus::Failed {
        lines.push(String::new());
        lines.push(format!(
            "**MANUAL ACTION REQUIRED:** {}",
            restore.detail.as_deref().unwrap_or("restoration incomplete")
        ));
    }
    lines
}

fn restore_status(status: RestoreStatus) -> &'static str {
    match status {
        RestoreStatus::Restored => "restored",
        RestoreStatus::DryRun => "dry_run",
        RestoreStatus::Failed => "failed",
    }
}

fn findings_header(phase: PhaseId, heading: &str, result: Option<&PhaseResult>) -> Vec<String> {
    let status = result.map_or("not run", |result| result.status.as_str());
    vec![
        format!("### Phase {} -- {heading}", phase.ordinal()),
        String::new(),
        format!("Status: `{status}`"),
        String::new(),
        "| Metric | Value |".to_string(),
        "|--------|-------|".to_string(),
    ]
}

fn failure_rate_findings(result: Option<&PhaseResult>, config: &ChaosConfig) -> Vec<String> {
    let chaos = &config.chaos;
    let (timing, rate): (Option<&DlqTimingRun>, Option<&ErrorRateRun>) =
        match result.map(|result| &result.measurements) {
            Some(PhaseMeasurements::FailureRate {
                dlq_timing,
                error_rate,
            }) => (dlq_timing.as_ref(), error_rate.as_ref()),
            _ => (None, None),
        };
    let summary = timing.map(|run| &run.summary);
    let samples = timing.map_or_else(
        || NOT_AVAILABLE.to_string(),
        |run| {
            run.samples_secs
                .iter()
                .map(|sample| secs(*sample))
                .collect::<Vec<_>>()
                .join(", ")
        },
    );
    let reporting = format_probability(chaos.reporting_failure_probability);

    let mut lines = findings_header(PhaseId::FailureRate, "Lambda Failure Rate", result);
    lines.extend([
        format!(
            "| Chaos mechanism (timing run) | `{}=1.0` env var |",
            chaos.failure_rate_env_key
        ),
        format!(
            "| Chaos mechanism (error-rate run) | `{}={reporting}` env var |",
            chaos.failure_rate_env_key
        ),
        format!(
            "| SQS visibility timeout (test) | {}s |",
            chaos.crash_visibility_timeout_secs
        ),
        format!("| SQS maxReceiveCount | {} |", chaos.max_receive_count),
        format!(
            "| DLQ probe timeout per unit | {}s |",
            failure_rate_probe_timeout_secs(config)
        ),
        format!("| DLQ routing samples | {samples} |"),
        format!(
            "| Units observed / missing | {} |",
            summary.map_or_else(
                || NOT_AVAILABLE.to_string(),
                |s| format!("{} / {}", s.observed, s.missing)
            )
        ),
        format!(
            "| Average DLQ routing time | {} |",
            secs(summary.and_then(|s| s.mean_secs))
        ),
        format!(
            "| Min / max DLQ routing time | {} / {} |",
            secs(summary.and_then(|s| s.min_secs)),
            secs(summary.and_then(|s| s.max_secs))
        ),
        format!(
            "| CloudWatch error detection | {} |",
            secs(timing.and_then(|run| run.detection_secs))
        ),
        format!(
            "| CloudWatch errors (timing run) | {} |",
            count(timing.map(|run| run.error_count))
        ),
        format!(
            "| CloudWatch errors (p={reporting}, {} units, {}s settle) | {} |",
            rate.map_or(chaos.reporting_units, |run| run.units),
            rate.map_or(config.probes.error_rate_settle_secs, |run| {
                run.settle_window_secs
            }),
            count(rate.map(|run| run.error_count))
        ),
        String::new(),
        format!(
            "**What happened:** with every invocation failing, SQS redelivered each message \
             {} times before routing it to the DLQ. At p={reporting} roughly half of the \
             invocations raised, which shows up in `AWS/Lambda Errors` within one metric period.",
            chaos.max_receive_count
        ),
        String::new(),
        "**Risk:** without a DLQ alarm these failures are silent. Messages accumulate in the \
         DLQ with no notification and the videos are never analysed."
            .to_string(),
    ]);
    lines
}

fn hang_findings(report: &RunReport, config: &ChaosConfig) -> Vec<String> {
    let chaos = &config.chaos;
    let result = report.phase(PhaseId::DependencyHang);
    let (routing, detection, errors) = match result.map(|result| &result.measurements) {
        Some(PhaseMeasurements::DependencyHang {
            dlq_routing,
            detection_secs,
            error_count,
            ..
        }) => (*dlq_routing, *detection_secs, Some(*error_count)),
        _ => (None, None, None),
    };

    let mut lines = findings_header(PhaseId::DependencyHang, "OpenAI Dependency Hang", result);
    lines.extend([
        format!(
            "| Chaos mechanism | `{}={}` env var |",
            chaos.induced_delay_env_key, chaos.induced_delay_secs
        ),
        format!("| Lambda timeout (test) | {}s |", chaos.hang_time_limit_secs),
        format!(
            "| SQS visibility timeout (test) | {}s |",
            chaos.hang_time_limit_secs + chaos.visibility_margin_secs
        ),
        format!(
            "| Expected DLQ bound | {}s |",
            expected_hang_bound_secs(chaos)
        ),
        format!("| DLQ probe timeout | {}s |", hang_probe_timeout_secs(config)),
        format!("| DLQ routing time | {} |", probe(routing)),
        format!("| CloudWatch detection | {} |", secs(detection)),
        format!("| CloudWatch errors | {} |", count(errors)),
        String::new(),
        format!(
            "**What happened:** the worker slept past its {}s limit and was terminated. SQS \
             redelivered the message after each visibility timeout and routed it to the DLQ \
             after {} forced terminations.",
            chaos.hang_time_limit_secs, chaos.max_receive_count
        ),
        String::new(),
        format!(
            "**Risk:** a real OpenAI outage holds every video for {}s x {} receives of \
             compute before DLQ routing. Concurrent uploads can exhaust reserved concurrency \
             and stall the whole pipeline.",
            report.original_time_limit_secs, chaos.max_receive_count
        ),
    ]);
    lines
}

fn recovery_findings(result: Option<&PhaseResult>) -> Vec<String> {
    let (outcome, drained) = match result.map(|result| &result.measurements) {
        Some(PhaseMeasurements::Recovery {
            result,
            drained_messages,
        }) => (*result, Some(*drained_messages)),
        _ => (None, None),
    };
    let recovered = outcome.is_some_and(ProbeOutcome::is_observed);

    let mut lines = findings_header(PhaseId::Recovery, "Recovery", result);
    lines.extend([
        format!("| Time to first successful result | {} |", probe(outcome)),
        format!("| DLQ messages drained before check | {} |", count(drained)),
        format!(
            "| Manual action required | {} |",
            if recovered { "None (automatic)" } else { "Investigate" }
        ),
        String::new(),
        if recovered {
            "**What happened:** removing the chaos variables and restoring the timeouts \
             returned the pipeline to normal operation without intervention."
                .to_string()
        } else {
            "**What happened:** no successful result was observed after restoration; check \
             the worker before the next run."
                .to_string()
        },
    ]);
    lines
}

fn count<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |value| value.to_string())
}
