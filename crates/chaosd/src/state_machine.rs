//! Phase ordering for a run.

use chaos_core::types::{PhaseId, PhaseResult, PhaseStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("invalid phase transition: {from:?} -> {to}")]
    InvalidTransition { from: Option<PhaseId>, to: PhaseId },
    #[error("result for {got} recorded while {expected:?} is active")]
    UnexpectedResult {
        expected: Option<PhaseId>,
        got: PhaseId,
    },
    #[error("phase {phase} recorded with non-terminal status {status}")]
    NonTerminal { phase: PhaseId, status: PhaseStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: Option<PhaseId>,
    pub to: PhaseId,
}

/// Phases only move forward; skipping ahead is allowed, revisiting is not.
pub fn is_transition_allowed(from: Option<PhaseId>, to: PhaseId) -> bool {
    match from {
        None => true,
        Some(from) => to.ordinal() > from.ordinal(),
    }
}

/// Results accumulated in execution order. Each entered phase records
/// exactly one terminal result.
#[derive(Debug, Default)]
pub struct PhaseSequence {
    current: Option<PhaseId>,
    recorded: bool,
    results: Vec<PhaseResult>,
}

impl PhaseSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<PhaseId> {
        self.current
    }

    pub fn enter(&mut self, to: PhaseId) -> Result<PhaseTransition, SequenceError> {
        let from = self.current;
        if !is_transition_allowed(from, to) {
            return Err(SequenceError::InvalidTransition { from, to });
        }
        self.current = Some(to);
        self.recorded = false;
        Ok(PhaseTransition { from, to })
    }

    pub fn record(&mut self, result: PhaseResult) -> Result<(), SequenceError> {
        if self.recorded || self.current != Some(result.phase) {
            return Err(SequenceError::UnexpectedResult {
                expected: self.current.filter(|_| !self.recorded),
                got: result.phase,
            });
        }
        if !result.status.is_terminal() {
            return Err(SequenceError::NonTerminal {
                phase: result.phase,
                status: result.status,
            });
        }
        self.recorded = true;
        self.results.push(result);
        Ok(())
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<PhaseResult> {
        self.results
    }
}
