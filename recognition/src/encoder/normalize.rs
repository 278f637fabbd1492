//! Per-hand normalization policies.
//!
//! Classifiers are trained against exactly one of these, so the policy is a
//! property of the domain and never a global switch.

use serde::{Deserialize, Serialize};

use crate::landmarks::{Point3, AXES, HAND_POINTS};

/// How a single hand's x/y coordinates are normalized. z always passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Translate so the minimum x and y land on 0.
    Position,
    /// Scale x and y into `[0,1]` by their per-hand range.
    MinMax,
}

/// Flatten one hand into exactly `HAND_POINTS * AXES` values.
///
/// Missing trailing points are zero-filled, extras are ignored and
/// non-finite coordinates become 0.
pub fn encode_hand(points: &[Point3], policy: NormalizationPolicy) -> Vec<f32> {
    let mut out = vec![0.0; HAND_POINTS * AXES];
    let used = &points[..points.len().min(HAND_POINTS)];
    if used.is_empty() {
        return out;
    }

    let (min_x, max_x) = bounds(used.iter().map(|p| p.x));
    let (min_y, max_y) = bounds(used.iter().map(|p| p.y));

    let (scale_x, scale_y) = match policy {
        NormalizationPolicy::Position => (1.0, 1.0),
        NormalizationPolicy::MinMax => (range_or_one(min_x, max_x), range_or_one(min_y, max_y)),
    };

    for (i, p) in used.iter().enumerate() {
        let base = i * AXES;
        out[base] = finite((p.x - min_x) / scale_x);
        out[base + 1] = finite((p.y - min_y) / scale_y);
        out[base + 2] = finite(p.z);
    }
    out
}

/// Flatten raw coordinates with no normalization, padded to `count` points.
pub fn encode_raw(points: Option<&[Point3]>, count: usize) -> Vec<f32> {
    let mut out = vec![0.0; count * AXES];
    if let Some(points) = points {
        for (i, p) in points.iter().take(count).enumerate() {
            let base = i * AXES;
            out[base] = finite(p.x);
            out[base + 1] = finite(p.y);
            out[base + 2] = finite(p.z);
        }
    }
    out
}

fn bounds(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}

fn range_or_one(min: f32, max: f32) -> f32 {
    let range = max - min;
    if range > 0.0 {
        range
    } else {
        1.0
    }
}

fn finite(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
