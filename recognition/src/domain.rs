//! Recognition domains and their fixed per-domain parameters.
//!
//! Each domain has its own classifier backend, trained against one feature
//! layout and one normalization policy. Nothing in this table is shared
//! across domains.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::{SequenceConfig, StabilityConfig};
use crate::encoder::{Encoding, NormalizationPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Alphabet,
    Numbers,
    Days,
    Words,
    Colors,
    GeneralWords,
    AzWords,
    Sentence,
    Spelling,
}

impl Domain {
    pub const ALL: [Domain; 9] = [
        Self::Alphabet,
        Self::Numbers,
        Self::Days,
        Self::Words,
        Self::Colors,
        Self::GeneralWords,
        Self::AzWords,
        Self::Sentence,
        Self::Spelling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alphabet => "alphabet",
            Self::Numbers => "numbers",
            Self::Days => "days",
            Self::Words => "words",
            Self::Colors => "colors",
            Self::GeneralWords => "general_words",
            Self::AzWords => "az_words",
            Self::Sentence => "sentence",
            Self::Spelling => "spelling",
        }
    }

    /// Environment variable overriding this domain's endpoint.
    pub fn endpoint_env_var(self) -> String {
        format!("SIGN_{}_URL", self.as_str().to_ascii_uppercase())
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Alphabet | Self::Spelling => 5001,
            Self::Numbers => 5002,
            Self::Words => 5003,
            Self::Colors => 5006,
            Self::GeneralWords => 5007,
            Self::Days => 5008,
            Self::AzWords => 5009,
            Self::Sentence => 5010,
        }
    }

    pub fn default_endpoint(self) -> String {
        format!("127.0.0.1:{}", self.default_port())
    }

    /// Catalogue defaults for this domain.
    pub fn profile(self) -> DomainProfile {
        let dual = Encoding::DualHand {
            policy: NormalizationPolicy::Position,
        };
        let (encoding, pipeline) = match self {
            Self::Alphabet | Self::Days | Self::Spelling => {
                (dual, Pipeline::Static(StabilityConfig::default()))
            }
            Self::Numbers => (
                Encoding::SingleHand {
                    policy: NormalizationPolicy::MinMax,
                },
                Pipeline::Static(StabilityConfig::default()),
            ),
            Self::Words | Self::Colors | Self::GeneralWords => {
                (Encoding::Holistic, Pipeline::Sequence(SequenceConfig::words()))
            }
            Self::AzWords => (
                Encoding::Holistic,
                Pipeline::Sequence(SequenceConfig::az_words()),
            ),
            Self::Sentence => (
                Encoding::Holistic,
                Pipeline::Sequence(SequenceConfig::sentence()),
            ),
        };

        let (threshold, repeat_count, celebration_ms) = match self {
            Self::Alphabet => (0.60, 1, 1000),
            Self::Sentence => (0.40, 1, 1500),
            Self::Spelling => (0.50, 1, 1500),
            _ => (0.60, 2, 1000),
        };

        DomainProfile {
            domain: self,
            endpoint: self.default_endpoint(),
            encoding,
            pipeline,
            threshold,
            repeat_count,
            celebration: Duration::from_millis(celebration_ms),
            send_target: self != Self::Sentence,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recognition domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}

/// How frames reach the channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pipeline {
    /// Send single held frames.
    Static(StabilityConfig),
    /// Send windows of frames.
    Sequence(SequenceConfig),
}

/// Resolved parameters for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainProfile {
    pub domain: Domain,
    /// `host:port` of the classifier backend.
    pub endpoint: String,
    pub encoding: Encoding,
    pub pipeline: Pipeline,
    /// Minimum confidence for a prediction to count as a match.
    pub threshold: f32,
    /// Consecutive matches needed to complete a target.
    pub repeat_count: usize,
    pub celebration: Duration,
    /// Whether payloads carry the current target label.
    pub send_target: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Eviction, FrameGuard};

    #[test]
    fn test_domain_parse_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
        assert_eq!("AZ-words".parse::<Domain>().unwrap(), Domain::AzWords);
        assert!("klingon".parse::<Domain>().is_err());
    }

    #[test]
    fn test_catalogue_parameters() {
        let numbers = Domain::Numbers.profile();
        assert_eq!(numbers.encoding.len(), 63);
        assert_eq!(
            numbers.encoding,
            Encoding::SingleHand {
                policy: NormalizationPolicy::MinMax
            }
        );
        assert_eq!(numbers.endpoint, "127.0.0.1:5002");

        let sentence = Domain::Sentence.profile();
        assert_eq!(sentence.encoding.len(), 1629);
        assert!(!sentence.send_target);
        assert_eq!(sentence.celebration, Duration::from_millis(1500));
        assert!(matches!(sentence.pipeline, Pipeline::Sequence(c) if c.length == 60));

        let words = Domain::GeneralWords.profile();
        assert!(matches!(
            words.pipeline,
            Pipeline::Sequence(c) if c.eviction == Eviction::Sliding { tail: 15 }
        ));

        let az = Domain::AzWords.profile();
        assert_eq!(az.encoding.len(), 1629);
        match az.pipeline {
            Pipeline::Sequence(c) => {
                assert_eq!(c.length, 30);
                assert_eq!(c.eviction, Eviction::Batch);
                assert_eq!(c.guard, FrameGuard::MinNonzeroRatio { ratio: 0.2 });
            }
            other => panic!("az_words should buffer sequences, got {other:?}"),
        }

        let spelling = Domain::Spelling.profile();
        assert_eq!(spelling.threshold, 0.5);
        assert_eq!(spelling.repeat_count, 1);
        assert_eq!(spelling.endpoint, Domain::Alphabet.default_endpoint());
    }

    #[test]
    fn test_thresholds_stay_in_range() {
        for domain in Domain::ALL {
            let profile = domain.profile();
            assert!((0.40..=0.85).contains(&profile.threshold));
            assert!((1..=3).contains(&profile.repeat_count));
        }
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(Domain::GeneralWords.endpoint_env_var(), "SIGN_GENERAL_WORDS_URL");
    }
}
