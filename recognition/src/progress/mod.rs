//! Learner progress persistence.
//!
//! The lesson session only talks to the [`ProgressStore`] trait. Writes are
//! keyed by user, stage and target id, and marking something complete twice
//! is a no-op.

pub mod file_store;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file_store::JsonFileProgressStore;
pub use memory::MemoryProgressStore;

/// Error type for progress store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid user id: {0:?}")]
    InvalidUser(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Correct,
    Incorrect,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn mark_target_complete(&self, user: &str, stage: &str, target_id: &str)
        -> StoreResult<()>;

    async fn record_attempt(
        &self,
        user: &str,
        stage: &str,
        target_id: &str,
        outcome: AttemptOutcome,
    ) -> StoreResult<()>;

    /// Add practice time to the stage total.
    async fn update_elapsed_time(&self, user: &str, stage: &str, elapsed: Duration)
        -> StoreResult<()>;

    /// Award any newly earned badges and return them.
    async fn evaluate_badges(&self, user: &str, stage: &str) -> StoreResult<Vec<String>>;

    async fn mark_stage_complete(&self, user: &str, stage: &str) -> StoreResult<()>;

    /// Completed target ids for a stage, in completion order.
    async fn load_completed(&self, user: &str, stage: &str) -> StoreResult<Vec<String>>;
}

/// Per-stage record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub completed: Vec<String>,
    pub correct_attempts: u64,
    pub incorrect_attempts: u64,
    pub elapsed_secs: u64,
    pub stage_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything stored for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    #[serde(default)]
    pub stages: BTreeMap<String, StageProgress>,
    #[serde(default)]
    pub badges: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stages: BTreeMap::new(),
            badges: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn stage(&self, stage: &str) -> Option<&StageProgress> {
        self.stages.get(stage)
    }

    fn stage_mut(&mut self, stage: &str) -> &mut StageProgress {
        self.updated_at = Utc::now();
        self.stages.entry(stage.to_string()).or_default()
    }

    /// Returns false when the target was already complete.
    pub fn mark_target_complete(&mut self, stage: &str, target_id: &str) -> bool {
        let progress = self.stage_mut(stage);
        if progress.completed.iter().any(|id| id == target_id) {
            return false;
        }
        progress.completed.push(target_id.to_string());
        true
    }

    pub fn record_attempt(&mut self, stage: &str, outcome: AttemptOutcome) {
        let progress = self.stage_mut(stage);
        match outcome {
            AttemptOutcome::Correct => progress.correct_attempts += 1,
            AttemptOutcome::Incorrect => progress.incorrect_attempts += 1,
        }
    }

    pub fn add_elapsed(&mut self, stage: &str, elapsed: Duration) {
        self.stage_mut(stage).elapsed_secs += elapsed.as_secs();
    }

    pub fn mark_stage_complete(&mut self, stage: &str) {
        let progress = self.stage_mut(stage);
        if !progress.stage_complete {
            progress.stage_complete = true;
            progress.completed_at = Some(Utc::now());
        }
    }

    /// Grant `{stage}_first` after the first completion and
    /// `{stage}_complete` once the stage is done. Returns new badges only.
    pub fn evaluate_badges(&mut self, stage: &str) -> Vec<String> {
        let Some(progress) = self.stages.get(stage) else {
            return Vec::new();
        };
        let mut earned = Vec::new();
        if !progress.completed.is_empty() {
            earned.push(format!("{stage}_first"));
        }
        if progress.stage_complete {
            earned.push(format!("{stage}_complete"));
        }
        let fresh: Vec<String> = earned
            .into_iter()
            .filter(|badge| self.badges.insert(badge.clone()))
            .collect();
        if !fresh.is_empty() {
            self.updated_at = Utc::now();
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_complete_is_idempotent() {
        let mut progress = UserProgress::new("u1");
        assert!(progress.mark_target_complete("alphabet", "A"));
        assert!(!progress.mark_target_complete("alphabet", "A"));
        assert_eq!(progress.stage("alphabet").unwrap().completed, vec!["A"]);
    }

    #[test]
    fn test_badges_awarded_once() {
        let mut progress = UserProgress::new("u1");
        assert!(progress.evaluate_badges("numbers").is_empty());

        progress.mark_target_complete("numbers", "1");
        assert_eq!(progress.evaluate_badges("numbers"), vec!["numbers_first"]);
        assert!(progress.evaluate_badges("numbers").is_empty());

        progress.mark_stage_complete("numbers");
        assert_eq!(progress.evaluate_badges("numbers"), vec!["numbers_complete"]);
    }

    #[test]
    fn test_attempts_and_time_accumulate() {
        let mut progress = UserProgress::new("u1");
        progress.record_attempt("days", AttemptOutcome::Correct);
        progress.record_attempt("days", AttemptOutcome::Incorrect);
        progress.record_attempt("days", AttemptOutcome::Incorrect);
        progress.add_elapsed("days", Duration::from_secs(30));
        progress.add_elapsed("days", Duration::from_secs(12));

        let days = progress.stage("days").unwrap();
        assert_eq!(days.correct_attempts, 1);
        assert_eq!(days.incorrect_attempts, 2);
        assert_eq!(days.elapsed_secs, 42);
    }
}
