//! Bounded sequence window for motion-based domains.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoder::{Encoded, FeatureVector};

/// What happens to the window once it reaches its length and is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Eviction {
    /// Keep the last `tail` frames for continuity into the next window.
    Sliding { tail: usize },
    /// Start over from empty.
    Batch,
}

/// Predicate deciding whether a frame is worth buffering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameGuard {
    /// Non-zero feature ratio must exceed this value.
    MinNonzeroRatio { ratio: f32 },
    /// A body pose must be detected.
    PosePresent,
}

impl FrameGuard {
    pub fn admits(&self, encoded: &Encoded) -> bool {
        match *self {
            Self::MinNonzeroRatio { ratio } => encoded.features.nonzero_ratio() > ratio,
            Self::PosePresent => encoded.presence.pose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Frames per emitted window.
    pub length: usize,
    pub eviction: Eviction,
    pub guard: FrameGuard,
    /// Consecutive rejected frames after which a partial window is dropped.
    pub clear_after_misses: u32,
}

impl SequenceConfig {
    /// 30-frame sliding window keeping 15, for word signs.
    pub fn words() -> Self {
        Self {
            length: 30,
            eviction: Eviction::Sliding { tail: 15 },
            guard: FrameGuard::MinNonzeroRatio { ratio: 0.3 },
            clear_after_misses: 15,
        }
    }

    /// 30-frame batch window for A-Z word signs. Sparser frames are admitted.
    pub fn az_words() -> Self {
        Self {
            length: 30,
            eviction: Eviction::Batch,
            guard: FrameGuard::MinNonzeroRatio { ratio: 0.2 },
            clear_after_misses: 15,
        }
    }

    /// 60-frame batch window, for sentences. Losing the pose restarts capture.
    pub fn sentence() -> Self {
        Self {
            length: 60,
            eviction: Eviction::Batch,
            guard: FrameGuard::PosePresent,
            clear_after_misses: 1,
        }
    }
}

/// Result of pushing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Frame buffered; window holds `filled` of `length` frames.
    Buffered { filled: usize, length: usize },
    /// Window reached its length. The frames are ready to send.
    Emitted(Vec<FeatureVector>),
    /// Guard rejected the frame.
    Rejected { cleared: bool },
}

/// Single-writer sequence accumulator.
#[derive(Debug)]
pub struct SequenceBuffer {
    config: SequenceConfig,
    window: VecDeque<FeatureVector>,
    misses: u32,
}

impl SequenceBuffer {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.length),
            config,
            misses: 0,
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.misses = 0;
    }

    pub fn push(&mut self, encoded: Encoded) -> PushOutcome {
        if !self.config.guard.admits(&encoded) {
            self.misses = self.misses.saturating_add(1);
            let cleared = self.misses >= self.config.clear_after_misses && !self.window.is_empty();
            if cleared {
                debug!(dropped = self.window.len(), "Sequence window cleared after missed frames");
                self.window.clear();
            }
            return PushOutcome::Rejected { cleared };
        }

        self.misses = 0;
        self.window.push_back(encoded.features);

        if self.window.len() < self.config.length {
            return PushOutcome::Buffered {
                filled: self.window.len(),
                length: self.config.length,
            };
        }

        let frames: Vec<FeatureVector> = self.window.iter().cloned().collect();
        match self.config.eviction {
            Eviction::Sliding { tail } => {
                let keep = tail.min(self.config.length.saturating_sub(1));
                let drop = self.window.len() - keep;
                self.window.drain(..drop);
            }
            Eviction::Batch => self.window.clear(),
        }
        debug!(
            frames = frames.len(),
            retained = self.window.len(),
            "Sequence window emitted"
        );
        PushOutcome::Emitted(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Presence;

    fn frame(marker: f32, pose: bool) -> Encoded {
        Encoded {
            features: FeatureVector::from_vec(vec![marker, marker, 1.0, 1.0]),
            presence: Presence {
                pose,
                ..Presence::default()
            },
        }
    }

    fn blank() -> Encoded {
        Encoded {
            features: FeatureVector::zeros(4),
            presence: Presence::default(),
        }
    }

    #[test]
    fn test_sliding_retains_tail() {
        let mut buffer = SequenceBuffer::new(SequenceConfig::words());

        for i in 0..29 {
            assert!(matches!(
                buffer.push(frame(i as f32 + 1.0, false)),
                PushOutcome::Buffered { .. }
            ));
        }
        let PushOutcome::Emitted(frames) = buffer.push(frame(30.0, false)) else {
            panic!("expected a full window");
        };
        assert_eq!(frames.len(), 30);
        assert_eq!(frames[0].as_slice()[0], 1.0);
        assert_eq!(buffer.len(), 15);

        // Next window needs 15 more frames and starts with frame 16.
        for i in 0..14 {
            buffer.push(frame(100.0 + i as f32, false));
        }
        let PushOutcome::Emitted(frames) = buffer.push(frame(200.0, false)) else {
            panic!("expected a second window");
        };
        assert_eq!(frames[0].as_slice()[0], 16.0);
    }

    #[test]
    fn test_batch_clears_after_emit() {
        let mut buffer = SequenceBuffer::new(SequenceConfig::sentence());
        let mut emitted = 0;
        for _ in 0..120 {
            if let PushOutcome::Emitted(frames) = buffer.push(frame(0.5, true)) {
                assert_eq!(frames.len(), 60);
                emitted += 1;
            }
        }
        assert_eq!(emitted, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_az_words_admits_sparse_frames_and_starts_fresh() {
        // 1 of 4 non-zero: below the word guard, above the A-Z guard
        let sparse = || Encoded {
            features: FeatureVector::from_vec(vec![0.7, 0.0, 0.0, 0.0]),
            presence: Presence::default(),
        };
        let mut words = SequenceBuffer::new(SequenceConfig::words());
        assert!(matches!(words.push(sparse()), PushOutcome::Rejected { .. }));

        let mut buffer = SequenceBuffer::new(SequenceConfig::az_words());
        for _ in 0..29 {
            assert!(matches!(buffer.push(sparse()), PushOutcome::Buffered { .. }));
        }
        assert!(matches!(buffer.push(sparse()), PushOutcome::Emitted(f) if f.len() == 30));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pose_loss_restarts_sentence_capture() {
        let mut buffer = SequenceBuffer::new(SequenceConfig::sentence());
        for _ in 0..40 {
            buffer.push(frame(0.5, true));
        }
        assert_eq!(buffer.push(frame(0.5, false)), PushOutcome::Rejected { cleared: true });
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_low_signal_frames_are_not_buffered() {
        let mut buffer = SequenceBuffer::new(SequenceConfig::words());
        for _ in 0..10 {
            buffer.push(frame(0.5, false));
        }
        for _ in 0..14 {
            assert_eq!(buffer.push(blank()), PushOutcome::Rejected { cleared: false });
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.push(blank()), PushOutcome::Rejected { cleared: true });
        assert!(buffer.is_empty());
    }
}
