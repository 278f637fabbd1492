//! Hold detection for static-sign domains.
//!
//! ```text
//! presence <= min_presence        -> clear ring, reset hand streak, not ready
//! ring < window                   -> not stable
//! mean pairwise diff < threshold  -> stable
//! ready = cooldown elapsed AND (stable OR streak >= force_after AND presence > min + margin)
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::encoder::FeatureVector;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Frames in the variance ring.
    pub window: usize,
    /// Mean absolute frame-to-frame difference below which the pose is held.
    pub variance_threshold: f32,
    /// Non-zero feature ratio a frame must exceed to count as "hands visible".
    pub min_presence: f32,
    /// Consecutive visible frames after which a send is forced.
    pub force_after_frames: u32,
    /// Extra presence the force path requires on top of `min_presence`.
    pub force_presence_margin: f32,
    #[serde(with = "millis")]
    pub cooldown: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: 3,
            variance_threshold: 0.12,
            min_presence: 0.25,
            force_after_frames: 4,
            force_presence_margin: 0.05,
            cooldown: Duration::from_millis(350),
        }
    }
}

/// Per-frame verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub hands_visible: bool,
    pub stable: bool,
    pub forced: bool,
    /// Send this frame.
    pub ready: bool,
    pub presence: f32,
}

#[derive(Debug)]
pub struct StabilityGate {
    config: StabilityConfig,
    ring: VecDeque<FeatureVector>,
    hand_streak: u32,
    last_send: Option<Instant>,
}

impl StabilityGate {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            ring: VecDeque::with_capacity(config.window.max(1)),
            config,
            hand_streak: 0,
            last_send: None,
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Forget everything, including the cooldown stamp.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.hand_streak = 0;
        self.last_send = None;
    }

    /// Evaluate one frame. A ready decision stamps the cooldown at `now`.
    pub fn observe(&mut self, features: &FeatureVector, now: Instant) -> GateDecision {
        let presence = features.nonzero_ratio();
        let hands_visible = presence > self.config.min_presence;

        let stable = if hands_visible {
            self.hand_streak = self.hand_streak.saturating_add(1);
            self.push(features.clone());
            self.is_stable()
        } else {
            self.hand_streak = 0;
            self.ring.clear();
            false
        };

        let forced = self.hand_streak >= self.config.force_after_frames
            && presence > self.config.min_presence + self.config.force_presence_margin;

        let cooldown_elapsed = self
            .last_send
            .map_or(true, |at| now.saturating_duration_since(at) > self.config.cooldown);

        let ready = cooldown_elapsed && (stable || forced);
        if ready {
            self.last_send = Some(now);
            debug!(stable, forced, presence, "Stability gate released frame");
        }

        GateDecision {
            hands_visible,
            stable,
            forced,
            ready,
            presence,
        }
    }

    fn push(&mut self, features: FeatureVector) {
        self.ring.push_back(features);
        while self.ring.len() > self.config.window {
            self.ring.pop_front();
        }
    }

    fn is_stable(&self) -> bool {
        if self.ring.len() < self.config.window || self.ring.len() < 2 {
            return false;
        }
        let pairs = self.ring.len() - 1;
        let total: f32 = self
            .ring
            .iter()
            .zip(self.ring.iter().skip(1))
            .map(|(a, b)| a.mean_abs_diff(b))
            .sum();
        total / (pairs as f32) < self.config.variance_threshold
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held() -> FeatureVector {
        FeatureVector::from_vec(vec![0.5, 0.4, 0.3, 0.2])
    }

    fn jitter(step: usize) -> FeatureVector {
        let v = if step % 2 == 0 { 0.9 } else { 0.1 };
        FeatureVector::from_vec(vec![v, 0.4, v, 0.2])
    }

    fn no_config_force() -> StabilityConfig {
        StabilityConfig {
            force_after_frames: u32::MAX,
            ..StabilityConfig::default()
        }
    }

    #[test]
    fn test_never_stable_before_window_fills() {
        let mut gate = StabilityGate::new(no_config_force());
        let now = Instant::now();

        assert!(!gate.observe(&held(), now).stable);
        assert!(!gate.observe(&held(), now).stable);
        let third = gate.observe(&held(), now);
        assert!(third.stable);
        assert!(third.ready);
    }

    #[test]
    fn test_jitter_is_not_stable() {
        let mut gate = StabilityGate::new(no_config_force());
        let now = Instant::now();
        for step in 0..6 {
            let decision = gate.observe(&jitter(step), now);
            assert!(!decision.stable);
            assert!(!decision.ready);
        }
    }

    #[test]
    fn test_absence_clears_ring() {
        let mut gate = StabilityGate::new(no_config_force());
        let now = Instant::now();
        gate.observe(&held(), now);
        gate.observe(&held(), now);

        let gone = gate.observe(&FeatureVector::zeros(4), now);
        assert!(!gone.hands_visible);

        // Re-entry starts a fresh ring.
        assert!(!gate.observe(&held(), now).stable);
        assert!(!gate.observe(&held(), now).stable);
        assert!(gate.observe(&held(), now).stable);
    }

    #[test]
    fn test_cooldown_throttles_sends() {
        let mut gate = StabilityGate::new(no_config_force());
        let start = Instant::now();
        for _ in 0..3 {
            gate.observe(&held(), start);
        }

        let soon = gate.observe(&held(), start + Duration::from_millis(100));
        assert!(soon.stable);
        assert!(!soon.ready);

        let later = gate.observe(&held(), start + Duration::from_millis(351));
        assert!(later.ready);
    }

    #[test]
    fn test_force_send_after_streak() {
        let mut gate = StabilityGate::new(StabilityConfig::default());
        let now = Instant::now();
        let decisions: Vec<_> = (0..4).map(|step| gate.observe(&jitter(step), now)).collect();

        assert!(decisions[..3].iter().all(|d| !d.ready));
        assert!(decisions[3].forced);
        assert!(decisions[3].ready);
        assert!(!decisions[3].stable);
    }

    #[test]
    fn test_force_requires_stricter_presence() {
        let mut gate = StabilityGate::new(StabilityConfig::default());
        let now = Instant::now();
        // 2 of 7 non-zero: above 0.25 but below 0.30
        let weak = |v: f32| FeatureVector::from_vec(vec![v, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);
        for step in 0..8 {
            let v = if step % 2 == 0 { 0.9 } else { 0.1 };
            let decision = gate.observe(&weak(v), now);
            assert!(decision.hands_visible);
            assert!(!decision.forced);
        }
    }
}
