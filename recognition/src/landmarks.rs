//! Landmark frames as delivered by the detection library.
//!
//! One frame per camera tick. Each tracked entity is either an ordered list
//! of normalized `[0,1]` image-space points or absent for that frame.

use serde::{Deserialize, Serialize};

/// Face mesh points emitted by the holistic detector.
pub const FACE_POINTS: usize = 468;
/// Body pose points.
pub const POSE_POINTS: usize = 33;
/// Points per detected hand.
pub const HAND_POINTS: usize = 21;
/// Coordinates per point.
pub const AXES: usize = 3;

/// A single landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Tracked entities within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Face,
    Pose,
    LeftHand,
    RightHand,
}

impl Entity {
    /// Number of points the detector reports for this entity.
    pub fn expected_points(self) -> usize {
        match self {
            Self::Face => FACE_POINTS,
            Self::Pose => POSE_POINTS,
            Self::LeftHand | Self::RightHand => HAND_POINTS,
        }
    }
}

/// Per-frame detection result.
///
/// Field names follow the detector's JSON output so recorded sessions can be
/// replayed without a translation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    #[serde(default, rename = "faceLandmarks", skip_serializing_if = "Option::is_none")]
    pub face: Option<Vec<Point3>>,
    #[serde(default, rename = "poseLandmarks", skip_serializing_if = "Option::is_none")]
    pub pose: Option<Vec<Point3>>,
    #[serde(
        default,
        rename = "leftHandLandmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub left_hand: Option<Vec<Point3>>,
    #[serde(
        default,
        rename = "rightHandLandmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub right_hand: Option<Vec<Point3>>,
}

impl LandmarkFrame {
    /// A frame with nothing detected.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_left_hand(mut self, points: Vec<Point3>) -> Self {
        self.left_hand = Some(points);
        self
    }

    pub fn with_right_hand(mut self, points: Vec<Point3>) -> Self {
        self.right_hand = Some(points);
        self
    }

    pub fn with_pose(mut self, points: Vec<Point3>) -> Self {
        self.pose = Some(points);
        self
    }

    pub fn with_face(mut self, points: Vec<Point3>) -> Self {
        self.face = Some(points);
        self
    }

    /// Points for an entity. Empty lists count as absent.
    pub fn entity(&self, entity: Entity) -> Option<&[Point3]> {
        let points = match entity {
            Entity::Face => self.face.as_deref(),
            Entity::Pose => self.pose.as_deref(),
            Entity::LeftHand => self.left_hand.as_deref(),
            Entity::RightHand => self.right_hand.as_deref(),
        };
        points.filter(|p| !p.is_empty())
    }

    pub fn has_hands(&self) -> bool {
        self.entity(Entity::LeftHand).is_some() || self.entity(Entity::RightHand).is_some()
    }

    pub fn has_pose(&self) -> bool {
        self.entity(Entity::Pose).is_some()
    }
}
