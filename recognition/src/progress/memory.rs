//! In-memory progress store for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AttemptOutcome, ProgressStore, StoreError, StoreResult, UserProgress};

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    users: Mutex<HashMap<String, UserProgress>>,
    fail_next: AtomicU32,
    writes: AtomicU32,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with `StoreError::Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Successful write operations so far.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn progress(&self, user: &str) -> Option<UserProgress> {
        self.lock().get(user).cloned()
    }

    /// Seed stored progress, as if from an earlier session.
    pub fn insert(&self, progress: UserProgress) {
        self.lock().insert(progress.user_id.clone(), progress);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserProgress>> {
        match self.users.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check(&self) -> StoreResult<()> {
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn write<R>(&self, user: &str, f: impl FnOnce(&mut UserProgress) -> R) -> StoreResult<R> {
        self.check()?;
        let mut users = self.lock();
        let progress = users
            .entry(user.to_string())
            .or_insert_with(|| UserProgress::new(user));
        let result = f(progress);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn mark_target_complete(
        &self,
        user: &str,
        stage: &str,
        target_id: &str,
    ) -> StoreResult<()> {
        self.write(user, |p| {
            p.mark_target_complete(stage, target_id);
        })
    }

    async fn record_attempt(
        &self,
        user: &str,
        stage: &str,
        _target_id: &str,
        outcome: AttemptOutcome,
    ) -> StoreResult<()> {
        self.write(user, |p| p.record_attempt(stage, outcome))
    }

    async fn update_elapsed_time(
        &self,
        user: &str,
        stage: &str,
        elapsed: Duration,
    ) -> StoreResult<()> {
        self.write(user, |p| p.add_elapsed(stage, elapsed))
    }

    async fn evaluate_badges(&self, user: &str, stage: &str) -> StoreResult<Vec<String>> {
        self.write(user, |p| p.evaluate_badges(stage))
    }

    async fn mark_stage_complete(&self, user: &str, stage: &str) -> StoreResult<()> {
        self.write(user, |p| p.mark_stage_complete(stage))
    }

    async fn load_completed(&self, user: &str, stage: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self
            .lock()
            .get(user)
            .and_then(|p| p.stage(stage))
            .map(|s| s.completed.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let store = MemoryProgressStore::new();
        store.fail_next(1);

        assert!(store.mark_target_complete("u", "s", "A").await.is_err());
        store.mark_target_complete("u", "s", "A").await.unwrap();
        store.mark_target_complete("u", "s", "A").await.unwrap();

        assert_eq!(store.load_completed("u", "s").await.unwrap(), vec!["A"]);
        assert_eq!(store.writes(), 2);
    }
}
