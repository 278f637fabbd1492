//! Per-domain frame path: encode, then gate or buffer, then build a request.

use tokio::time::Instant;

use crate::buffer::{GateDecision, PushOutcome, SequenceBuffer, StabilityGate};
use crate::channel::PredictRequest;
use crate::domain::{DomainProfile, Pipeline};
use crate::encoder::Presence;
use crate::landmarks::LandmarkFrame;

enum Stage {
    Static(StabilityGate),
    Sequence(SequenceBuffer),
}

/// What one frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub presence: Presence,
    /// Static domains only.
    pub gate: Option<GateDecision>,
    /// Sequence domains only: `(filled, length)` after the push.
    pub fill: Option<(usize, usize)>,
    pub request: Option<PredictRequest>,
}

pub struct DomainPipeline {
    profile: DomainProfile,
    stage: Stage,
}

impl DomainPipeline {
    pub fn new(profile: DomainProfile) -> Self {
        let stage = match profile.pipeline {
            Pipeline::Static(config) => Stage::Static(StabilityGate::new(config)),
            Pipeline::Sequence(config) => Stage::Sequence(SequenceBuffer::new(config)),
        };
        Self { profile, stage }
    }

    pub fn profile(&self) -> &DomainProfile {
        &self.profile
    }

    /// Drop buffered frames so the next capture starts clean.
    pub fn reset(&mut self) {
        match &mut self.stage {
            Stage::Static(gate) => gate.reset(),
            Stage::Sequence(buffer) => buffer.clear(),
        }
    }

    pub fn process(
        &mut self,
        frame: &LandmarkFrame,
        target: Option<&str>,
        now: Instant,
    ) -> FrameOutcome {
        let encoded = self.profile.encoding.encode(frame);
        let presence = encoded.presence;
        let target = target
            .filter(|_| self.profile.send_target)
            .map(str::to_string);

        match &mut self.stage {
            Stage::Static(gate) => {
                let decision = gate.observe(&encoded.features, now);
                FrameOutcome {
                    presence,
                    gate: Some(decision),
                    fill: None,
                    request: decision
                        .ready
                        .then(|| PredictRequest::landmarks(encoded.features, target)),
                }
            }
            Stage::Sequence(buffer) => {
                let length = buffer.config().length;
                let (fill, request) = match buffer.push(encoded) {
                    PushOutcome::Buffered { filled, length } => (Some((filled, length)), None),
                    PushOutcome::Emitted(frames) => (
                        Some((buffer.len(), length)),
                        Some(PredictRequest::sequence(frames, target)),
                    ),
                    PushOutcome::Rejected { .. } => (Some((buffer.len(), length)), None),
                };
                FrameOutcome {
                    presence,
                    gate: None,
                    fill,
                    request,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::landmarks::{Point3, HAND_POINTS};

    fn hand_frame() -> LandmarkFrame {
        let hand: Vec<Point3> = (0..HAND_POINTS)
            .map(|i| Point3::new(0.3 + i as f32 * 0.01, 0.4 + i as f32 * 0.02, 0.01))
            .collect();
        LandmarkFrame::empty()
            .with_left_hand(hand.clone())
            .with_right_hand(hand)
    }

    #[test]
    fn test_static_pipeline_sends_held_pose_with_target() {
        let mut pipeline = DomainPipeline::new(Domain::Alphabet.profile());
        let now = Instant::now();

        assert!(pipeline.process(&hand_frame(), Some("A"), now).request.is_none());
        assert!(pipeline.process(&hand_frame(), Some("A"), now).request.is_none());
        let outcome = pipeline.process(&hand_frame(), Some("A"), now);
        match outcome.request {
            Some(PredictRequest::Landmarks { landmarks, target }) => {
                assert_eq!(landmarks.len(), 126);
                assert_eq!(target.as_deref(), Some("A"));
            }
            other => panic!("expected landmarks request, got {other:?}"),
        }
        assert!(outcome.presence.left_hand && outcome.presence.right_hand);
    }

    #[test]
    fn test_sentence_pipeline_omits_target() {
        let mut pipeline = DomainPipeline::new(Domain::Sentence.profile());
        let frame = LandmarkFrame::empty().with_pose(vec![Point3::new(0.5, 0.5, 0.0); 33]);
        let now = Instant::now();

        let mut request = None;
        for _ in 0..60 {
            request = pipeline.process(&frame, Some("Hello"), now).request.or(request);
        }
        match request {
            Some(PredictRequest::Sequence { sequence, target }) => {
                assert_eq!(sequence.len(), 60);
                assert_eq!(sequence[0].len(), 1629);
                assert!(target.is_none());
            }
            other => panic!("expected sequence request, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_restarts_capture() {
        let mut pipeline = DomainPipeline::new(Domain::Sentence.profile());
        let frame = LandmarkFrame::empty().with_pose(vec![Point3::new(0.5, 0.5, 0.0); 33]);
        let now = Instant::now();
        for _ in 0..10 {
            pipeline.process(&frame, None, now);
        }
        pipeline.reset();
        assert_eq!(pipeline.process(&frame, None, now).fill, Some((1, 60)));
    }
}
