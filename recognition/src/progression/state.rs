//! Types shared by the progression machines.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Something the learner has to sign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Key in the completed set and the progress store.
    pub id: String,
    /// Label compared against predictions.
    pub label: String,
}

impl Target {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: label.clone(),
            label,
        }
    }

    /// A target keyed by position, so repeated labels complete separately.
    pub fn positional(position: usize, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: format!("{position}:{label}"),
            label,
        }
    }

    /// Case-insensitive exact comparison with surrounding whitespace ignored.
    pub fn matches(&self, label: &str) -> bool {
        self.label.trim().to_lowercase() == label.trim().to_lowercase()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Acceptance rules for one machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRules {
    pub threshold: f32,
    pub repeat_count: usize,
    #[serde(with = "crate::buffer::stability::millis")]
    pub celebration: Duration,
}

/// Most recent consecutive matches for the current target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHistory {
    capacity: usize,
    labels: VecDeque<String>,
}

impl MatchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            labels: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, label: impl Into<String>) {
        self.labels.push_back(label.into());
        while self.labels.len() > self.capacity {
            self.labels.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.labels.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Which machine a celebration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketScope {
    Lesson,
    Spelling,
}

/// Identifies one celebration. Expiry with any other ticket is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CelebrationTicket {
    pub scope: TicketScope,
    pub seq: u64,
}

/// Machine phase. Only `Idle` and `Matching` accept predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Matching { history: MatchHistory },
    Celebrating { ticket: CelebrationTicket },
    /// Delegated to a nested spelling machine.
    Spelling,
    Complete,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Matching { .. } => "matching",
            Self::Celebrating { .. } => "celebrating",
            Self::Spelling => "spelling",
            Self::Complete => "complete",
        }
    }

    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Idle | Self::Matching { .. })
    }

    pub fn is_advancing(&self) -> bool {
        matches!(self, Self::Celebrating { .. } | Self::Spelling)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effects requested by a machine transition. The caller performs them.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AttemptRecorded { target: Target, correct: bool },
    TargetCompleted { target: Target, completed: usize, total: usize },
    CelebrationStarted { ticket: CelebrationTicket, delay: Duration },
    Advanced { index: usize, target: Target },
    /// Emitted at most once per machine lifetime.
    StageCompleted,
    /// The sentinel target was signed; a nested machine should take over.
    SpellingRequested { sentinel: Target },
    SpellingStarted { name: String },
    LetterCompleted { position: usize, letter: String },
    LetterAdvanced { position: usize, letter: String },
    SpellingFinished { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Normal,
    Spelling,
}

/// Serializable view of a lesson's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub target_index: usize,
    pub current_target: Option<Target>,
    /// Completed target ids in completion order.
    pub completed: Vec<String>,
    pub total: usize,
    pub is_advancing: bool,
    pub mode: Mode,
    pub phase: String,
    pub history_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spelling: Option<Box<ProgressionSnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("navigation is not allowed while {0}")]
    Busy(&'static str),

    #[error("target index {index} out of range (lesson has {len} targets)")]
    OutOfRange { index: usize, len: usize },

    #[error("lesson has no targets")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_matching_is_case_insensitive_and_exact() {
        let target = Target::new("Hello");
        assert!(target.matches("hello"));
        assert!(target.matches("  HELLO "));
        assert!(!target.matches("hell"));
        assert!(!target.matches("hello world"));
    }

    #[test]
    fn test_positional_ids_differ_for_repeated_letters() {
        let first = Target::positional(1, "N");
        let second = Target::positional(3, "N");
        assert_ne!(first.id, second.id);
        assert_eq!(first.label, second.label);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = MatchHistory::new(2);
        history.push("A");
        assert!(!history.is_full());
        history.push("A");
        history.push("A");
        assert!(history.is_full());
        assert_eq!(history.len(), 2);
    }
}
