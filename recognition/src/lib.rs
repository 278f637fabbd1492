//! Sign Lesson Recognition Core
//!
//! This library provides:
//! - Landmark frame encoding into fixed-length, domain-specific feature vectors
//! - Frame admission: a stability gate for static signs and a sequence window for motion signs
//! - Per-domain duplex channels to classifier backends with bounded reconnects
//! - Lesson progression with repeat-count matching, celebration timers and nested name spelling
//! - A lesson session that owns all of the above and writes progress through a store
//!
//! # Domains
//!
//! | Domain | Encoding | Pipeline |
//! |---|---|---|
//! | `alphabet`, `days`, `spelling` | dual hand, 126 | stability gate |
//! | `numbers` | single hand, 63 | stability gate |
//! | `words`, `colors`, `general_words`, `az_words` | holistic, 1629 | 30-frame sliding window |
//! | `sentence` | holistic, 1629 | 60-frame batch window |
//!
//! # Usage
//!
//! ```ignore
//! let config = LessonConfig::load(Path::new("lesson.toml"))?;
//! let options = SessionOptions::default();
//! let (session, handle) = LessonSession::open(config.resolve(None), deps, options).await;
//! let report = session.run(&mut source).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod domain;
pub mod encoder;
pub mod events;
pub mod landmarks;
pub mod pipeline;
pub mod progress;
pub mod progression;
pub mod resilience;
pub mod session;
pub mod source;

// Re-export frame and feature types
pub use encoder::{Encoded, Encoding, FeatureVector, NormalizationPolicy, Presence};
pub use landmarks::{LandmarkFrame, Point3};

// Re-export admission types
pub use buffer::{
    GateDecision, PushOutcome, SequenceBuffer, SequenceConfig, StabilityConfig, StabilityGate,
};

// Re-export channel types
pub use channel::{
    ChannelError, ChannelStatus, Connector, MemoryConnector, PredictRequest, PredictionEvent,
    RecognitionChannel, SendOutcome, TcpConnector,
};

// Re-export domain and config types
pub use config::{ConfigError, LessonConfig, ResolvedLesson};
pub use domain::{Domain, DomainProfile, Pipeline};

// Re-export progression types
pub use progression::{
    Effect, LessonProgression, NavigationError, Phase, ProgressionMachine, ProgressionSnapshot,
    Target,
};

// Re-export session types
pub use events::{LessonEvent, LessonEventBus, SharedLessonEventBus};
pub use progress::{JsonFileProgressStore, MemoryProgressStore, ProgressStore, StoreError};
pub use resilience::RetryPolicy;
pub use session::{
    LessonSession, SessionDeps, SessionEnd, SessionError, SessionHandle, SessionOptions,
    SessionReport,
};
pub use source::{FrameSource, FrameSourceError, ScriptedFrameSource};
