use std::path::PathBuf;

/// Runner settings taken from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Key for the progress store
    pub user_id: String,
    /// Directory holding one progress document per user
    pub progress_dir: PathBuf,
    /// Name spelled in spelling lessons
    pub user_name: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl RunnerConfig {
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            user_id: env("SIGN_USER_ID")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "local".to_string()),
            progress_dir: env("SIGN_PROGRESS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".sign-progress")),
            user_name: env("SIGN_USER_NAME").filter(|v| !v.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = RunnerConfig::from_lookup(|_| None);
        assert_eq!(config.user_id, "local");
        assert_eq!(config.progress_dir, PathBuf::from(".sign-progress"));
        assert!(config.user_name.is_none());
    }

    #[test]
    fn test_env_values() {
        let config = RunnerConfig::from_lookup(|key| match key {
            "SIGN_USER_ID" => Some("u-42".into()),
            "SIGN_PROGRESS_DIR" => Some("/tmp/progress".into()),
            "SIGN_USER_NAME" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.user_id, "u-42");
        assert_eq!(config.progress_dir, PathBuf::from("/tmp/progress"));
        assert!(config.user_name.is_none());
    }
}
