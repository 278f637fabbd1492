//! One pretty-printed JSON document per learner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AttemptOutcome, ProgressStore, StoreError, StoreResult, UserProgress};

#[derive(Debug)]
pub struct JsonFileProgressStore {
    dir: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user: &str) -> StoreResult<PathBuf> {
        let valid = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !user.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidUser(user.to_string()));
        }
        Ok(self.dir.join(format!("{user}.json")))
    }

    /// Load a learner's document, if one exists.
    pub async fn load(&self, user: &str) -> StoreResult<Option<UserProgress>> {
        let path = self.path_for(user)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, progress: &UserProgress) -> StoreResult<()> {
        let path = self.path_for(&progress.user_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(progress)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Progress saved");
        Ok(())
    }

    async fn update<R>(
        &self,
        user: &str,
        f: impl FnOnce(&mut UserProgress) -> R + Send,
    ) -> StoreResult<R> {
        let _guard = self.write_lock.lock().await;
        let mut progress = self
            .load(user)
            .await?
            .unwrap_or_else(|| UserProgress::new(user));
        let result = f(&mut progress);
        self.save(&progress).await?;
        Ok(result)
    }
}

#[async_trait]
impl ProgressStore for JsonFileProgressStore {
    async fn mark_target_complete(
        &self,
        user: &str,
        stage: &str,
        target_id: &str,
    ) -> StoreResult<()> {
        self.update(user, |p| {
            p.mark_target_complete(stage, target_id);
        })
        .await
    }

    async fn record_attempt(
        &self,
        user: &str,
        stage: &str,
        _target_id: &str,
        outcome: AttemptOutcome,
    ) -> StoreResult<()> {
        self.update(user, |p| p.record_attempt(stage, outcome)).await
    }

    async fn update_elapsed_time(
        &self,
        user: &str,
        stage: &str,
        elapsed: Duration,
    ) -> StoreResult<()> {
        self.update(user, |p| p.add_elapsed(stage, elapsed)).await
    }

    async fn evaluate_badges(&self, user: &str, stage: &str) -> StoreResult<Vec<String>> {
        self.update(user, |p| p.evaluate_badges(stage)).await
    }

    async fn mark_stage_complete(&self, user: &str, stage: &str) -> StoreResult<()> {
        self.update(user, |p| p.mark_stage_complete(stage)).await
    }

    async fn load_completed(&self, user: &str, stage: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .load(user)
            .await?
            .and_then(|p| p.stages.get(stage).map(|s| s.completed.clone()))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        let store = JsonFileProgressStore::new(dir.path());
        store.mark_target_complete("learner-1", "alphabet", "A").await.unwrap();
        store.mark_target_complete("learner-1", "alphabet", "B").await.unwrap();
        store.mark_target_complete("learner-1", "alphabet", "A").await.unwrap();
        store
            .update_elapsed_time("learner-1", "alphabet", Duration::from_secs(90))
            .await
            .unwrap();

        let reopened = JsonFileProgressStore::new(dir.path());
        assert_eq!(
            reopened.load_completed("learner-1", "alphabet").await.unwrap(),
            vec!["A", "B"]
        );
        let progress = reopened.load("learner-1").await.unwrap().unwrap();
        assert_eq!(progress.stages["alphabet"].elapsed_secs, 90);
    }

    #[tokio::test]
    async fn test_missing_user_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("nested"));
        assert!(store.load("nobody").await.unwrap().is_none());
        assert!(store.load_completed("nobody", "s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_user_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileProgressStore::new(dir.path());
        for bad in ["", "../etc", "a/b", ".hidden"] {
            assert!(matches!(
                store.mark_stage_complete(bad, "s").await,
                Err(StoreError::InvalidUser(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_badges_survive_reload() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileProgressStore::new(dir.path());
        store.mark_target_complete("u", "colors", "Red").await.unwrap();
        assert_eq!(store.evaluate_badges("u", "colors").await.unwrap(), vec!["colors_first"]);

        let reopened = JsonFileProgressStore::new(dir.path());
        assert!(reopened.evaluate_badges("u", "colors").await.unwrap().is_empty());
    }
}
