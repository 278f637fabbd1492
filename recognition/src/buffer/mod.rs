//! Frame buffering ahead of the recognition channel.
//!
//! Motion domains fold frames into a [`SequenceBuffer`]; static domains run
//! every frame through a [`StabilityGate`] and only send held poses.

pub mod sequence;
pub mod stability;

pub use sequence::{Eviction, FrameGuard, PushOutcome, SequenceBuffer, SequenceConfig};
pub use stability::{GateDecision, StabilityConfig, StabilityGate};
