//! Lesson progression.
//!
//! A [`ProgressionMachine`] walks one list of targets. [`LessonProgression`]
//! pairs a parent machine with an optional nested spelling machine that takes
//! over when the parent reaches its sentinel target.

pub mod machine;
pub mod spelling;
pub mod state;

pub use machine::ProgressionMachine;
pub use spelling::{spelling_name, LessonProgression, PredictionSource, SpellingConfig};
pub use state::{
    CelebrationTicket, Effect, MatchHistory, MatchRules, Mode, NavigationError, Phase,
    ProgressionSnapshot, Target, TicketScope,
};
