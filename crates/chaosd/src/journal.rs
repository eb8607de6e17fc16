//! Append-only JSONL journal of a run, one file per run id.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chaos_core::types::{
    ChaosParameters, PhaseId, PhaseResult, ProbeOutcome, RestoreRecord, RunId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to create journal directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize journal entry: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to journal {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read journal {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed journal line {line} in {path}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        dry_run: bool,
        skip_baseline: bool,
        skip_timeout: bool,
    },
    SnapshotCaptured {
        env_vars: usize,
        time_limit_secs: u64,
    },
    PhaseStarted {
        phase: PhaseId,
    },
    /// Written once the change has propagated to the worker.
    Injected {
        phase: PhaseId,
        parameters: ChaosParameters,
    },
    ProbeFinished {
        phase: PhaseId,
        probe: ProbeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_id: Option<String>,
        outcome: ProbeOutcome,
    },
    /// Carries the whole result: applied parameters, uploads and probe
    /// outcomes.
    PhaseFinished {
        result: PhaseResult,
    },
    Restored {
        record: RestoreRecord,
    },
    RunFinished {
        interrupted: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    DeadLetter,
    ResultArtifact,
    /// Earliest error bucket; `timed_out` means none in the window.
    FirstError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub run_id: RunId,
    #[serde(flatten)]
    pub event: RunEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunJournal {
    pub root: PathBuf,
    pub file: PathBuf,
}

impl RunJournal {
    pub fn new(root: impl Into<PathBuf>, run_id: &RunId) -> Self {
        let root = root.into();
        let file = root.join(format!("chaos_run_{run_id}.jsonl"));
        Self { root, file }
    }

    pub fn path(&self) -> &Path {
        self.file.as_path()
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        fs::create_dir_all(&self.root).map_err(|source| JournalError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        append_json_line(&self.file, entry)
    }

    /// Append, logging instead of failing; the journal is never allowed to
    /// stop a run.
    pub fn record(&self, at: DateTime<Utc>, run_id: &RunId, event: RunEvent) {
        let entry = JournalEntry {
            at,
            run_id: run_id.clone(),
            event,
        };
        if let Err(err) = self.append(&entry) {
            warn!(path = %self.file.display(), error = %err, "journal write failed");
        }
    }

    pub fn read_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let contents = fs::read_to_string(&self.file).map_err(|source| JournalError::Read {
            path: self.file.clone(),
            source,
        })?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| JournalError::Parse {
                    path: self.file.clone(),
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}

/// A journal bound to one run, stamped from the run's clock.
#[derive(Clone, Copy)]
pub struct JournalSink<'a> {
    journal: &'a RunJournal,
    run_id: &'a RunId,
    clock: &'a dyn Clock,
}

impl<'a> JournalSink<'a> {
    pub fn new(journal: &'a RunJournal, run_id: &'a RunId, clock: &'a dyn Clock) -> Self {
        Self {
            journal,
            run_id,
            clock,
        }
    }

    pub fn record(&self, event: RunEvent) {
        self.journal
            .record(self.clock.wall_now(), self.run_id, event);
    }
}

fn append_json_line(path: &Path, entry: &JournalEntry) -> Result<(), JournalError> {
    let line =
        serde_json::to_string(entry).map_err(|source| JournalError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| JournalError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|source| JournalError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use chaos_core::types::{PhaseStatus, RestoreStatus};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn journal_file_is_named_after_run() {
        let journal = RunJournal::new("/tmp/reports", &RunId::new("ab12cd34"));
        assert_eq!(
            journal.path(),
            Path::new("/tmp/reports/chaos_run_ab12cd34.jsonl")
        );
    }

    #[test]
    fn append_creates_directory_and_round_trips_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = RunId::new("ab12cd34");
        let journal = RunJournal::new(dir.path().join("nested"), &run_id);

        journal.record(at(), &run_id, RunEvent::PhaseStarted {
            phase: PhaseId::Baseline,
        });
        journal.record(at(), &run_id, RunEvent::PhaseFinished {
            result: PhaseResult::skipped(PhaseId::DependencyHang),
        });
        journal.record(at(), &run_id, RunEvent::Restored {
            record: RestoreRecord {
                status: RestoreStatus::Restored,
                drained_messages: 2,
                detail: None,
            },
        });

        let entries = journal.read_all().expect("read");
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].event,
            RunEvent::PhaseStarted {
                phase: PhaseId::Baseline
            }
        );
        match &entries[1].event {
            RunEvent::PhaseFinished { result } => assert_eq!(result.status, PhaseStatus::Skipped),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn lines_are_tagged_by_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = RunId::new("r1");
        let journal = RunJournal::new(dir.path(), &run_id);
        journal.record(at(), &run_id, RunEvent::RunFinished { interrupted: true });

        let raw = fs::read_to_string(journal.path()).expect("read");
        assert!(raw.contains("\"event\":\"run_finished\""));
        assert!(raw.contains("\"run_id\":\"r1\""));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn sink_stamps_injections_and_observations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = RunId::new("r2");
        let journal = RunJournal::new(dir.path(), &run_id);
        let clock = ManualClock::new();
        let sink = JournalSink::new(&journal, &run_id, &clock);

        sink.record(RunEvent::Injected {
            phase: PhaseId::FailureRate,
            parameters: ChaosParameters::crash(1.0, 30),
        });
        sink.record(RunEvent::ProbeFinished {
            phase: PhaseId::FailureRate,
            probe: ProbeKind::DeadLetter,
            video_id: Some("abc-chaos-fail-0.mp4".to_string()),
            outcome: ProbeOutcome::observed(92.0),
        });

        let entries = journal.read_all().expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].at, clock.wall_now());
        assert_eq!(entries[0].run_id, run_id);
        assert!(matches!(
            &entries[1].event,
            RunEvent::ProbeFinished {
                probe: ProbeKind::DeadLetter,
                outcome: ProbeOutcome::Observed { .. },
                ..
            }
        ));
        let raw = fs::read_to_string(journal.path()).expect("read");
        assert!(raw.contains("\"event\":\"injected\""));
        assert!(raw.contains("\"probe\":\"dead_letter\""));
    }

    #[test]
    fn unwritable_journal_does_not_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").expect("write");
        let run_id = RunId::new("r1");
        let journal = RunJournal::new(blocker.join("journal"), &run_id);

        journal.record(at(), &run_id, RunEvent::RunFinished { interrupted: false });

        assert!(journal.read_all().is_err());
    }
}
