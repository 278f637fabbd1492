//! Shared fixtures for session-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use recognition::channel::{MemoryServer, PredictionEvent};
use recognition::landmarks::HAND_POINTS;
use recognition::{
    LandmarkFrame, LessonConfig, LessonEvent, LessonEventBus, MemoryConnector,
    MemoryProgressStore, Point3, ResolvedLesson, RetryPolicy, ScriptedFrameSource, SessionDeps,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const USER: &str = "learner-1";

/// Both hands held still.
pub fn hands_frame() -> LandmarkFrame {
    let hand: Vec<Point3> = (0..HAND_POINTS)
        .map(|i| Point3::new(0.3 + i as f32 * 0.01, 0.4 + i as f32 * 0.015, 0.02))
        .collect();
    LandmarkFrame::empty()
        .with_left_hand(hand.clone())
        .with_right_hand(hand)
}

/// `count` identical hand frames, 50ms apart.
pub fn held_pose(count: usize) -> ScriptedFrameSource {
    ScriptedFrameSource::new(
        std::iter::repeat_with(hands_frame).take(count),
        Duration::from_millis(50),
    )
}

/// Resolve a TOML lesson without touching the process environment.
pub fn lesson(toml: &str) -> ResolvedLesson {
    let mut resolved = LessonConfig::from_toml_str(toml)
        .expect("valid lesson")
        .resolve_with(Some("Al"), |_| None);
    resolved.retry = RetryPolicy::fixed(2, Duration::from_millis(50));
    resolved
}

pub struct Harness {
    pub deps: SessionDeps,
    pub store: Arc<MemoryProgressStore>,
    pub connector: Arc<MemoryConnector>,
    pub events: broadcast::Receiver<LessonEvent>,
}

pub fn harness() -> (Harness, MemoryServer) {
    let (connector, server) = MemoryConnector::new();
    let store = Arc::new(MemoryProgressStore::new());
    let bus = LessonEventBus::new().shared();
    let events = bus.subscribe();
    let deps = SessionDeps {
        user_id: USER.to_string(),
        store: store.clone(),
        bus,
        connector: connector.clone(),
    };
    (
        Harness {
            deps,
            store,
            connector,
            events,
        },
        server,
    )
}

/// A classifier that answers every request with its own target label.
pub fn spawn_echo_backend(mut server: MemoryServer, confidence: f32) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut peer) = server.accept().await {
            tokio::spawn(async move {
                while let Some(envelope) = peer.recv().await {
                    let Some(target) = envelope.data.get("target").and_then(|t| t.as_str()) else {
                        continue;
                    };
                    let event = PredictionEvent::new(target, confidence);
                    if !peer.send_prediction(&event).await {
                        break;
                    }
                }
            });
        }
    })
}

/// Everything published so far.
pub fn drain(events: &mut broadcast::Receiver<LessonEvent>) -> Vec<LessonEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn count(events: &[LessonEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}
