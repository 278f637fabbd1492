//! Lesson configuration.
//!
//! A lesson is a TOML file naming the stage, the recognition domain and the
//! target labels. Everything else defaults from the domain catalogue:
//!
//! ```toml
//! stage = "sentence_stage_1"
//! domain = "sentence"
//! targets = ["Hello", "My Name is", "Thank you"]
//!
//! [overrides]
//! threshold = 0.45
//!
//! [spelling]
//! sentinel = "My Name is"
//! ```
//!
//! Endpoints can be overridden per domain with `SIGN_<DOMAIN>_URL`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::StabilityConfig;
use crate::domain::{Domain, DomainProfile, Pipeline};
use crate::progression::{spelling_name, MatchRules, SpellingConfig, Target};
use crate::resilience::RetryPolicy;

/// Label that starts name spelling when no sentinel is configured.
pub const DEFAULT_SENTINEL: &str = "My Name is";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse lesson config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid lesson config: {0}")]
    Invalid(String),
}

/// Optional per-domain adjustments on top of the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOverrides {
    pub threshold: Option<f32>,
    pub repeat_count: Option<usize>,
    pub celebration_ms: Option<u64>,
    /// `host:port`
    pub endpoint: Option<String>,
    pub stability: Option<StabilityConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellingSection {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    #[serde(flatten)]
    pub overrides: DomainOverrides,
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonConfig {
    pub stage: String,
    pub domain: Domain,
    pub targets: Vec<String>,
    #[serde(default)]
    pub overrides: DomainOverrides,
    #[serde(default)]
    pub spelling: Option<SpellingSection>,
    /// Connect and device-open retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Fully resolved lesson parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLesson {
    pub stage: String,
    pub targets: Vec<Target>,
    pub lesson: DomainProfile,
    pub spelling: Option<ResolvedSpelling>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpelling {
    pub profile: DomainProfile,
    pub config: SpellingConfig,
}

impl ResolvedLesson {
    pub fn lesson_rules(&self) -> MatchRules {
        rules_of(&self.lesson)
    }
}

impl LessonConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage.trim().is_empty() {
            return Err(ConfigError::Invalid("stage must not be empty".into()));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("lesson has no targets".into()));
        }
        if let Some(blank) = self.targets.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("target {blank} is blank")));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self
            .targets
            .iter()
            .find(|t| !seen.insert(t.trim().to_lowercase()))
        {
            // a repeated label shares one completion key and could never finish
            return Err(ConfigError::Invalid(format!("target {dup:?} is listed twice")));
        }
        if self.domain == Domain::Spelling {
            return Err(ConfigError::Invalid(
                "spelling runs nested inside a lesson, not as a lesson domain".into(),
            ));
        }
        validate_overrides("overrides", &self.overrides)?;
        if let Some(spelling) = &self.spelling {
            validate_overrides("spelling", &spelling.overrides)?;
            let present = self
                .targets
                .iter()
                .any(|t| Target::new(t.as_str()).matches(&spelling.sentinel));
            if !present {
                return Err(ConfigError::Invalid(format!(
                    "spelling sentinel {:?} is not one of the targets",
                    spelling.sentinel
                )));
            }
        }
        Ok(())
    }

    /// Resolve against the catalogue and the process environment.
    pub fn resolve(&self, user_name: Option<&str>) -> ResolvedLesson {
        self.resolve_with(user_name, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with(
        &self,
        user_name: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> ResolvedLesson {
        let lesson = apply(self.domain.profile(), &self.overrides, &env);
        let spelling = self.spelling.as_ref().map(|section| {
            let profile = apply(Domain::Spelling.profile(), &section.overrides, &env);
            ResolvedSpelling {
                config: SpellingConfig {
                    sentinel: section.sentinel.clone(),
                    name: spelling_name(user_name),
                    rules: rules_of(&profile),
                },
                profile,
            }
        });

        ResolvedLesson {
            stage: self.stage.clone(),
            targets: self.targets.iter().map(|t| Target::new(t.trim())).collect(),
            lesson,
            spelling,
            retry: self.retry.clone(),
        }
    }
}

fn validate_overrides(section: &str, o: &DomainOverrides) -> Result<(), ConfigError> {
    if let Some(t) = o.threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::Invalid(format!(
                "{section}.threshold {t} outside [0, 1]"
            )));
        }
    }
    if let Some(n) = o.repeat_count {
        if n == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}.repeat_count must be at least 1"
            )));
        }
    }
    Ok(())
}

fn apply(
    mut profile: DomainProfile,
    overrides: &DomainOverrides,
    env: &impl Fn(&str) -> Option<String>,
) -> DomainProfile {
    if let Some(t) = overrides.threshold {
        profile.threshold = t;
    }
    if let Some(n) = overrides.repeat_count {
        profile.repeat_count = n;
    }
    if let Some(ms) = overrides.celebration_ms {
        profile.celebration = Duration::from_millis(ms);
    }
    if let (Some(stability), Pipeline::Static(_)) = (overrides.stability, profile.pipeline) {
        profile.pipeline = Pipeline::Static(stability);
    }
    if let Some(endpoint) = &overrides.endpoint {
        profile.endpoint = endpoint.clone();
    }
    // environment wins over the file
    if let Some(endpoint) = env(&profile.domain.endpoint_env_var()) {
        profile.endpoint = endpoint;
    }
    profile
}

fn rules_of(profile: &DomainProfile) -> MatchRules {
    MatchRules {
        threshold: profile.threshold,
        repeat_count: profile.repeat_count,
        celebration: profile.celebration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTENCE: &str = r#"
stage = "sentence_stage_1"
domain = "sentence"
targets = ["Hello", "My Name is", "Thank you"]

[overrides]
threshold = 0.45

[spelling]
celebration_ms = 1200
"#;

    #[test]
    fn test_parse_and_resolve_defaults() {
        let config = LessonConfig::from_toml_str(SENTENCE).unwrap();
        let resolved = config.resolve_with(Some("Ana"), |_| None);

        assert_eq!(resolved.lesson.threshold, 0.45);
        assert_eq!(resolved.lesson.repeat_count, 1);
        assert_eq!(resolved.lesson.endpoint, "127.0.0.1:5010");
        assert_eq!(resolved.targets[1], Target::new("My Name is"));
        assert_eq!(resolved.retry, RetryPolicy::default());

        let spelling = resolved.spelling.unwrap();
        assert_eq!(spelling.config.sentinel, DEFAULT_SENTINEL);
        assert_eq!(spelling.config.name, "ANA");
        assert_eq!(spelling.config.rules.threshold, 0.5);
        assert_eq!(spelling.config.rules.celebration, Duration::from_millis(1200));
    }

    #[test]
    fn test_env_overrides_endpoint() {
        let config = LessonConfig::from_toml_str(SENTENCE).unwrap();
        let resolved = config.resolve_with(None, |key| match key {
            "SIGN_SENTENCE_URL" => Some("10.0.0.5:7000".to_string()),
            "SIGN_SPELLING_URL" => Some("10.0.0.5:7001".to_string()),
            _ => None,
        });
        assert_eq!(resolved.lesson.endpoint, "10.0.0.5:7000");
        assert_eq!(resolved.spelling.unwrap().profile.endpoint, "10.0.0.5:7001");
    }

    #[test]
    fn test_stability_override_for_static_domain() {
        let config = LessonConfig::from_toml_str(
            r#"
stage = "numbers_1"
domain = "numbers"
targets = ["1", "2"]

[overrides.stability]
cooldown = 500
variance_threshold = 0.2
"#,
        )
        .unwrap();
        let resolved = config.resolve_with(None, |_| None);
        let Pipeline::Static(stability) = resolved.lesson.pipeline else {
            panic!("numbers is a static domain");
        };
        assert_eq!(stability.cooldown, Duration::from_millis(500));
        assert_eq!(stability.variance_threshold, 0.2);
        assert_eq!(stability.window, 3);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"stage = "s"
domain = "alphabet"
targets = []"#,
            r#"stage = "s"
domain = "alphabet"
targets = ["A"]
[overrides]
threshold = 1.5"#,
            r#"stage = "s"
domain = "sentence"
targets = ["Hello"]
[spelling]
sentinel = "My Name is""#,
            r#"stage = "s"
domain = "spelling"
targets = ["A"]"#,
        ];
        for case in cases {
            assert!(matches!(
                LessonConfig::from_toml_str(case),
                Err(ConfigError::Invalid(_))
            ));
        }
        assert!(matches!(
            LessonConfig::from_toml_str("stage = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        for targets in [r#"["A", "A"]"#, r#"["Hello", "B", " hello "]"#] {
            let toml = format!("stage = \"s\"\ndomain = \"alphabet\"\ntargets = {targets}");
            match LessonConfig::from_toml_str(&toml) {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains("listed twice"), "{msg}"),
                other => panic!("expected duplicate rejection, got {other:?}"),
            }
        }

        let distinct = r#"stage = "s"
domain = "alphabet"
targets = ["A", "B"]"#;
        assert!(LessonConfig::from_toml_str(distinct).is_ok());
    }
}
