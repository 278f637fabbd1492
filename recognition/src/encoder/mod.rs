//! Landmark frame to fixed-length feature vector.
//!
//! Encoding is total: every frame produces a vector of exactly
//! [`Encoding::len`] values. Absent entities are zero-filled so the
//! downstream classifier always sees the same shape.
//!
//! ```text
//! SingleHand  63   right hand if present, else left, else zeros
//! DualHand    126  left(63) ++ right(63)
//! Holistic    1629 face(1404) ++ pose(99) ++ left(63) ++ right(63)
//! ```

pub mod normalize;

use serde::{Deserialize, Serialize};

use crate::landmarks::{Entity, LandmarkFrame, AXES, FACE_POINTS, HAND_POINTS, POSE_POINTS};

pub use normalize::NormalizationPolicy;

/// Values per hand.
pub const HAND_FEATURES: usize = HAND_POINTS * AXES;
/// Length of a holistic (face + pose + hands) vector.
pub const HOLISTIC_FEATURES: usize = (FACE_POINTS + POSE_POINTS + 2 * HAND_POINTS) * AXES;

/// An encoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Fraction of features that are non-zero, used as the "something is visible" signal.
    pub fn nonzero_ratio(&self) -> f32 {
        if self.0.is_empty() {
            return 0.0;
        }
        let nonzero = self.0.iter().filter(|v| **v != 0.0).count();
        nonzero as f32 / self.0.len() as f32
    }

    /// Mean absolute per-dimension difference to another vector of the same length.
    pub fn mean_abs_diff(&self, other: &FeatureVector) -> f32 {
        let n = self.0.len().min(other.0.len());
        if n == 0 {
            return 0.0;
        }
        let total: f32 = self.0[..n]
            .iter()
            .zip(&other.0[..n])
            .map(|(a, b)| (a - b).abs())
            .sum();
        total / n as f32
    }
}

/// Which hands/body parts contributed real data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
    pub left_hand: bool,
    pub right_hand: bool,
    pub pose: bool,
    pub face: bool,
}

impl Presence {
    fn of(frame: &LandmarkFrame) -> Self {
        Self {
            left_hand: frame.entity(Entity::LeftHand).is_some(),
            right_hand: frame.entity(Entity::RightHand).is_some(),
            pose: frame.entity(Entity::Pose).is_some(),
            face: frame.entity(Entity::Face).is_some(),
        }
    }

    pub fn any_hand(&self) -> bool {
        self.left_hand || self.right_hand
    }
}

/// Result of encoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub features: FeatureVector,
    pub presence: Presence,
}

/// Domain-specific feature layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// One hand, preferring the right.
    SingleHand { policy: NormalizationPolicy },
    /// Both hands, left first.
    DualHand { policy: NormalizationPolicy },
    /// Face, pose and both hands, raw coordinates.
    Holistic,
}

impl Encoding {
    /// Output length, constant for every frame.
    pub fn len(&self) -> usize {
        match self {
            Self::SingleHand { .. } => HAND_FEATURES,
            Self::DualHand { .. } => 2 * HAND_FEATURES,
            Self::Holistic => HOLISTIC_FEATURES,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode a frame. Never fails.
    pub fn encode(&self, frame: &LandmarkFrame) -> Encoded {
        let presence = Presence::of(frame);
        let values = match *self {
            Self::SingleHand { policy } => {
                let right = hand(frame, Entity::RightHand, policy);
                if right.iter().any(|v| *v != 0.0) {
                    right
                } else {
                    hand(frame, Entity::LeftHand, policy)
                }
            }
            Self::DualHand { policy } => {
                let mut values = hand(frame, Entity::LeftHand, policy);
                values.extend(hand(frame, Entity::RightHand, policy));
                values
            }
            Self::Holistic => {
                let mut values = Vec::with_capacity(HOLISTIC_FEATURES);
                for entity in [
                    Entity::Face,
                    Entity::Pose,
                    Entity::LeftHand,
                    Entity::RightHand,
                ] {
                    values.extend(normalize::encode_raw(
                        frame.entity(entity),
                        entity.expected_points(),
                    ));
                }
                values
            }
        };
        debug_assert_eq!(values.len(), self.len());

        Encoded {
            features: FeatureVector(values),
            presence,
        }
    }
}

fn hand(frame: &LandmarkFrame, entity: Entity, policy: NormalizationPolicy) -> Vec<f32> {
    match frame.entity(entity) {
        Some(points) => normalize::encode_hand(points, policy),
        None => vec![0.0; HAND_FEATURES],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Point3;

    fn hand_points(seed: f32) -> Vec<Point3> {
        (0..HAND_POINTS)
            .map(|i| Point3::new(seed + i as f32 * 0.013, seed + i as f32 * 0.007, 0.02))
            .collect()
    }

    fn presence_combinations() -> Vec<LandmarkFrame> {
        vec![
            LandmarkFrame::empty(),
            LandmarkFrame::empty().with_left_hand(hand_points(0.2)),
            LandmarkFrame::empty().with_right_hand(hand_points(0.4)),
            LandmarkFrame::empty()
                .with_left_hand(hand_points(0.2))
                .with_right_hand(hand_points(0.4)),
            LandmarkFrame::empty()
                .with_pose(vec![Point3::new(0.5, 0.5, 0.0); 10])
                .with_face(vec![Point3::new(0.4, 0.3, 0.0); 500]),
        ]
    }

    #[test]
    fn test_length_constant_for_all_presence_combinations() {
        let encodings = [
            Encoding::SingleHand {
                policy: NormalizationPolicy::MinMax,
            },
            Encoding::DualHand {
                policy: NormalizationPolicy::Position,
            },
            Encoding::Holistic,
        ];
        for encoding in encodings {
            for frame in presence_combinations() {
                assert_eq!(encoding.encode(&frame).features.len(), encoding.len());
            }
        }
        assert_eq!(HOLISTIC_FEATURES, 1629);
    }

    #[test]
    fn test_dual_hand_zero_fills_missing_side() {
        let encoding = Encoding::DualHand {
            policy: NormalizationPolicy::Position,
        };

        let none = encoding.encode(&LandmarkFrame::empty());
        assert_eq!(none.features.len(), 126);
        assert!(none.features.as_slice().iter().all(|v| *v == 0.0));

        let right_only = encoding.encode(&LandmarkFrame::empty().with_right_hand(hand_points(0.3)));
        let values = right_only.features.as_slice();
        assert!(values[..HAND_FEATURES].iter().all(|v| *v == 0.0));
        assert!(values[HAND_FEATURES..].iter().any(|v| *v != 0.0));
        assert!(right_only.presence.right_hand);
        assert!(!right_only.presence.left_hand);

        let both = encoding.encode(
            &LandmarkFrame::empty()
                .with_left_hand(hand_points(0.2))
                .with_right_hand(hand_points(0.3)),
        );
        let values = both.features.as_slice();
        assert!(values[..HAND_FEATURES].iter().any(|v| *v != 0.0));
        assert!(values[HAND_FEATURES..].iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_single_hand_prefers_right() {
        let encoding = Encoding::SingleHand {
            policy: NormalizationPolicy::Position,
        };
        let left = hand_points(0.1);
        let mut right = hand_points(0.1);
        right[4].z = 0.9;

        let both = encoding.encode(
            &LandmarkFrame::empty()
                .with_left_hand(left.clone())
                .with_right_hand(right),
        );
        assert!((both.features.as_slice()[4 * AXES + 2] - 0.9).abs() < 1e-6);

        let left_only = encoding.encode(&LandmarkFrame::empty().with_left_hand(left));
        assert!(left_only.features.as_slice().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_holistic_keeps_raw_coordinates_in_order() {
        let frame = LandmarkFrame::empty()
            .with_pose(vec![Point3::new(0.25, 0.75, 0.1)])
            .with_right_hand(vec![Point3::new(0.6, 0.7, 0.0)]);
        let values = Encoding::Holistic.encode(&frame).features.into_inner();

        let pose_start = FACE_POINTS * AXES;
        assert_eq!(values[pose_start], 0.25);
        assert_eq!(values[pose_start + 1], 0.75);

        let right_start = (FACE_POINTS + POSE_POINTS + HAND_POINTS) * AXES;
        assert_eq!(values[right_start], 0.6);
        assert!(values[..pose_start].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_nonzero_ratio_and_diff() {
        let a = FeatureVector::from_vec(vec![0.0, 1.0, 0.0, 1.0]);
        let b = FeatureVector::from_vec(vec![0.0, 0.5, 0.0, 1.5]);
        assert_eq!(a.nonzero_ratio(), 0.5);
        assert!((a.mean_abs_diff(&b) - 0.25).abs() < 1e-6);
        assert_eq!(FeatureVector::zeros(0).nonzero_ratio(), 0.0);
    }
}
