//! Event types published on the lesson bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelStatus;
use crate::domain::Domain;

/// All lesson presentation events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LessonEvent {
    /// A recognition channel changed state
    ChannelStatusChanged {
        domain: Domain,
        status: ChannelStatus,
        timestamp: DateTime<Utc>,
    },

    /// Hands entered or left the frame
    HandPresence {
        left: bool,
        right: bool,
        stable: bool,
        timestamp: DateTime<Utc>,
    },

    /// Sequence window fill level
    BufferProgress {
        filled: usize,
        length: usize,
        timestamp: DateTime<Utc>,
    },

    /// A prediction reached the session
    PredictionReceived {
        domain: Domain,
        label: String,
        confidence: f32,
        matched: bool,
        timestamp: DateTime<Utc>,
    },

    /// The current target was completed and celebration began
    TargetCompleted {
        stage: String,
        target: String,
        completed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// The lesson moved to another target
    TargetAdvanced {
        index: usize,
        target: String,
        timestamp: DateTime<Utc>,
    },

    /// Spelling mode began for a name
    SpellingStarted {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// One letter of the name was signed
    LetterCompleted {
        position: usize,
        letter: String,
        timestamp: DateTime<Utc>,
    },

    /// Every letter of the name was signed
    SpellingFinished {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// All targets in the stage are complete
    StageCompleted {
        stage: String,
        elapsed_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// The progress store granted a badge
    BadgeAwarded {
        badge: String,
        timestamp: DateTime<Utc>,
    },
}

impl LessonEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChannelStatusChanged { .. } => "channel_status_changed",
            Self::HandPresence { .. } => "hand_presence",
            Self::BufferProgress { .. } => "buffer_progress",
            Self::PredictionReceived { .. } => "prediction_received",
            Self::TargetCompleted { .. } => "target_completed",
            Self::TargetAdvanced { .. } => "target_advanced",
            Self::SpellingStarted { .. } => "spelling_started",
            Self::LetterCompleted { .. } => "letter_completed",
            Self::SpellingFinished { .. } => "spelling_finished",
            Self::StageCompleted { .. } => "stage_completed",
            Self::BadgeAwarded { .. } => "badge_awarded",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ChannelStatusChanged { timestamp, .. }
            | Self::HandPresence { timestamp, .. }
            | Self::BufferProgress { timestamp, .. }
            | Self::PredictionReceived { timestamp, .. }
            | Self::TargetCompleted { timestamp, .. }
            | Self::TargetAdvanced { timestamp, .. }
            | Self::SpellingStarted { timestamp, .. }
            | Self::LetterCompleted { timestamp, .. }
            | Self::SpellingFinished { timestamp, .. }
            | Self::StageCompleted { timestamp, .. }
            | Self::BadgeAwarded { timestamp, .. } => *timestamp,
        }
    }

    /// Whether the event marks learner progress rather than live feedback.
    pub fn is_milestone(&self) -> bool {
        matches!(
            self,
            Self::TargetCompleted { .. }
                | Self::LetterCompleted { .. }
                | Self::SpellingFinished { .. }
                | Self::StageCompleted { .. }
                | Self::BadgeAwarded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = LessonEvent::TargetCompleted {
            stage: "alphabet".to_string(),
            target: "A".to_string(),
            completed: 1,
            total: 26,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "target_completed");
        assert_eq!(value["target"], "A");
        assert!(event.is_milestone());
    }

    #[test]
    fn test_channel_status_event_round_trip() {
        let event = LessonEvent::ChannelStatusChanged {
            domain: Domain::Sentence,
            status: ChannelStatus::Degraded,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: LessonEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "channel_status_changed");
        assert!(!back.is_milestone());
    }
}
