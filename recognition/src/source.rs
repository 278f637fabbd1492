//! Detection boundary.
//!
//! A [`FrameSource`] yields one [`LandmarkFrame`] per camera tick. Opening it
//! can fail transiently (device busy, permission prompt pending), so the
//! session retries `start` under its retry policy.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use crate::landmarks::LandmarkFrame;

#[derive(Debug, thiserror::Error)]
pub enum FrameSourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad frame on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-frame callback source.
///
/// `next_frame` must be cancel safe: the session polls it inside a
/// `select!` and may drop the future when another event wins.
#[async_trait]
pub trait FrameSource: Send {
    async fn start(&mut self) -> Result<(), FrameSourceError>;

    /// Next frame, or `None` when the source is exhausted.
    async fn next_frame(&mut self) -> Option<LandmarkFrame>;

    async fn stop(&mut self);
}

/// Plays back a fixed list of frames at a fixed interval.
#[derive(Debug)]
pub struct ScriptedFrameSource {
    frames: VecDeque<LandmarkFrame>,
    interval: Duration,
    failures_before_start: u32,
    started: bool,
    stopped: bool,
}

impl ScriptedFrameSource {
    pub fn new(frames: impl IntoIterator<Item = LandmarkFrame>, interval: Duration) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            interval,
            failures_before_start: 0,
            started: false,
            stopped: false,
        }
    }

    /// Fail `start` this many times before succeeding.
    pub fn failing_start(mut self, times: u32) -> Self {
        self.failures_before_start = times;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for ScriptedFrameSource {
    async fn start(&mut self) -> Result<(), FrameSourceError> {
        if self.failures_before_start > 0 {
            self.failures_before_start -= 1;
            return Err(FrameSourceError::Unavailable("device busy".into()));
        }
        self.started = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<LandmarkFrame> {
        if !self.started || self.stopped {
            return None;
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.frames.pop_front()
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}
