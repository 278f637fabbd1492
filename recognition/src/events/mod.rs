//! Presentation events for a lesson session.
//!
//! Nothing in the recognition path reads these back; they exist so a UI or
//! console can follow along.

pub mod bus;
pub mod types;

pub use bus::{LessonEventBus, SharedLessonEventBus};
pub use types::LessonEvent;
