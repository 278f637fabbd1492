//! Lesson session: the single owner of a running lesson.
//!
//! One tokio task multiplexes every input through `select!`, so progression
//! state is only ever touched by one event at a time:
//!
//! ```text
//!            ┌──────────────┐   frames    ┌───────────────┐  predict  ┌─────────┐
//!            │ FrameSource  │ ──────────▶ │ DomainPipeline│ ────────▶ │ Channel │
//!            └──────────────┘             └───────────────┘           └────┬────┘
//!                                                                          │ prediction
//!   commands ──┐                                                           ▼
//!   deadline ──┼──────────────▶  select! loop  ──▶ LessonProgression ──▶ Effects
//!   cancel   ──┘                                                           │
//!                                                   ┌──────────────────────┼────────────┐
//!                                                   ▼                      ▼            ▼
//!                                             ProgressStore          LessonEventBus  deadline
//! ```
//!
//! Teardown order is fixed: stop the frame source, drop the listeners,
//! disconnect channels, drop the pending deadline, then persist elapsed time
//! and wait for outstanding store writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{
    ChannelStatus, Connector, PredictionEvent, PredictionListener, RecognitionChannel, SendOutcome,
};
use crate::config::ResolvedLesson;
use crate::domain::Domain;
use crate::events::{LessonEvent, SharedLessonEventBus};
use crate::landmarks::LandmarkFrame;
use crate::pipeline::DomainPipeline;
use crate::progress::{AttemptOutcome, ProgressStore, StoreResult};
use crate::progression::{
    CelebrationTicket, Effect, LessonProgression, NavigationError, PredictionSource,
    ProgressionSnapshot,
};
use crate::resilience::{retry, RetryPolicy};
use crate::source::{FrameSource, FrameSourceError};

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("frame source failed to start: {0}")]
    FrameSource(#[source] FrameSourceError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("session has ended")]
    Closed,
}

/// Shared services a session writes to.
#[derive(Clone)]
pub struct SessionDeps {
    pub user_id: String,
    pub store: Arc<dyn ProgressStore>,
    pub bus: SharedLessonEventBus,
    pub connector: Arc<dyn Connector>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Start from the store's completed targets.
    pub resume: bool,
    /// How long to keep listening for late predictions after the last frame.
    pub linger: Duration,
    /// Retry policy for progress writes.
    pub store_retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            resume: true,
            linger: Duration::from_secs(2),
            store_retry: RetryPolicy::fixed(3, Duration::from_millis(250)),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    StageComplete,
    FramesExhausted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub end: SessionEnd,
    pub snapshot: ProgressionSnapshot,
    pub elapsed: Duration,
    pub frames: u64,
    pub requests_sent: u64,
}

type NavReply = oneshot::Sender<Result<(), NavigationError>>;

enum Command {
    Skip(NavReply),
    Previous(NavReply),
    Jump(usize, NavReply),
    SkipLetter(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<ProgressionSnapshot>),
}

/// Control surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub async fn skip(&self) -> Result<(), SessionError> {
        self.request(Command::Skip).await?.map_err(Into::into)
    }

    pub async fn previous(&self) -> Result<(), SessionError> {
        self.request(Command::Previous).await?.map_err(Into::into)
    }

    pub async fn jump(&self, index: usize) -> Result<(), SessionError> {
        self.request(|tx| Command::Jump(index, tx))
            .await?
            .map_err(Into::into)
    }

    pub async fn skip_letter(&self) -> Result<(), SessionError> {
        self.request(Command::SkipLetter).await
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(Command::Reset).await
    }

    pub async fn snapshot(&self) -> Result<ProgressionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Request teardown. The running loop exits on its next turn.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Lesson-scoped state. Built by [`LessonSession::open`], consumed by [`LessonSession::run`].
pub struct LessonSession {
    id: Uuid,
    stage: String,
    deps: SessionDeps,
    options: SessionOptions,
    source_retry: RetryPolicy,
    progression: LessonProgression,
    lesson_channel: RecognitionChannel,
    lesson_pipeline: DomainPipeline,
    spelling_channel: Option<RecognitionChannel>,
    spelling_pipeline: Option<DomainPipeline>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    deadline: Option<(Instant, CelebrationTicket)>,
    writes: JoinSet<()>,
    last_presence: Option<(bool, bool, bool)>,
    started: Instant,
    frames: u64,
    requests_sent: u64,
}

impl LessonSession {
    /// Build a session and load resume state. Nothing is connected yet.
    pub async fn open(
        resolved: ResolvedLesson,
        deps: SessionDeps,
        options: SessionOptions,
    ) -> (Self, SessionHandle) {
        let rules = resolved.lesson_rules();
        let spelling_config = resolved.spelling.as_ref().map(|s| s.config.clone());
        let mut progression = LessonProgression::new(resolved.targets, rules, spelling_config);

        if options.resume {
            match deps.store.load_completed(&deps.user_id, &resolved.stage).await {
                Ok(completed) if !completed.is_empty() => {
                    info!(
                        stage = %resolved.stage,
                        completed = completed.len(),
                        "Resuming lesson from stored progress"
                    );
                    progression = progression.resume(completed);
                }
                Ok(_) => {}
                Err(e) => warn!(
                    stage = %resolved.stage,
                    error = %e,
                    "Could not load progress, starting fresh"
                ),
            }
        }

        let lesson_channel = RecognitionChannel::new(
            resolved.lesson.domain,
            resolved.lesson.endpoint.clone(),
            deps.connector.clone(),
            resolved.retry.clone(),
        );
        let (spelling_channel, spelling_pipeline) = match resolved.spelling {
            Some(spelling) => (
                Some(RecognitionChannel::new(
                    spelling.profile.domain,
                    spelling.profile.endpoint.clone(),
                    deps.connector.clone(),
                    resolved.retry.clone(),
                )),
                Some(DomainPipeline::new(spelling.profile)),
            ),
            None => (None, None),
        };

        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            commands: tx,
            cancel: cancel.clone(),
        };

        let session = Self {
            id: Uuid::new_v4(),
            stage: resolved.stage,
            deps,
            options,
            source_retry: resolved.retry,
            progression,
            lesson_channel,
            lesson_pipeline: DomainPipeline::new(resolved.lesson),
            spelling_channel,
            spelling_pipeline,
            commands: rx,
            cancel,
            deadline: None,
            writes: JoinSet::new(),
            last_presence: None,
            started: Instant::now(),
            frames: 0,
            requests_sent: 0,
        };
        (session, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lesson_channel(&self) -> &RecognitionChannel {
        &self.lesson_channel
    }

    pub fn spelling_channel(&self) -> Option<&RecognitionChannel> {
        self.spelling_channel.as_ref()
    }

    /// Run until the stage completes, frames run out, or the handle cancels.
    pub async fn run<S: FrameSource + ?Sized>(
        mut self,
        source: &mut S,
    ) -> Result<SessionReport, SessionError> {
        start_source(source, &self.source_retry).await?;
        self.started = Instant::now();

        let forwarders = CancellationToken::new();
        let mut status_tasks = vec![forward_status(
            &self.lesson_channel,
            self.deps.bus.clone(),
            forwarders.clone(),
        )];
        if let Some(channel) = &self.spelling_channel {
            status_tasks.push(forward_status(channel, self.deps.bus.clone(), forwarders.clone()));
        }

        let spelling_channel = self.spelling_channel.clone();
        let (lesson_status, spelling_status) = tokio::join!(self.lesson_channel.connect(), async {
            match &spelling_channel {
                Some(channel) => Some(channel.connect().await),
                None => None,
            }
        });
        info!(
            session = %self.id,
            stage = %self.stage,
            lesson = %lesson_status,
            spelling = ?spelling_status,
            "Lesson session started"
        );

        let mut lesson_listener = Some(self.lesson_channel.on_prediction());
        let mut spelling_listener = self.spelling_channel.as_ref().map(|c| c.on_prediction());

        let mut frames_done = false;
        let mut linger_until: Option<Instant> = None;
        let mut commands_open = true;

        let end = loop {
            if self.progression.is_complete() && self.deadline.is_none() {
                break SessionEnd::StageComplete;
            }

            let deadline = self.deadline.map(|(at, _)| at);
            let linger = linger_until.filter(|_| self.deadline.is_none());

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break SessionEnd::Cancelled,

                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => commands_open = false,
                },

                _ = sleep_until_opt(deadline) => {
                    if let Some((_, ticket)) = self.deadline.take() {
                        let effects = self.progression.on_celebration_elapsed(ticket);
                        self.apply(effects);
                    }
                }

                Some(event) = recv_opt(&mut lesson_listener) => {
                    self.on_prediction(PredictionSource::Lesson, event);
                }

                Some(event) = recv_opt(&mut spelling_listener) => {
                    self.on_prediction(PredictionSource::Spelling, event);
                }

                frame = source.next_frame(), if !frames_done => match frame {
                    Some(frame) => self.on_frame(&frame),
                    None => {
                        debug!(frames = self.frames, "Frame source exhausted");
                        frames_done = true;
                        linger_until = Some(Instant::now() + self.options.linger);
                    }
                },

                _ = sleep_until_opt(linger) => break SessionEnd::FramesExhausted,
            }
        };

        // Teardown
        source.stop().await;
        if let Some(listener) = lesson_listener.take() {
            self.lesson_channel.off_prediction(listener);
        }
        if let (Some(listener), Some(channel)) =
            (spelling_listener.take(), &self.spelling_channel)
        {
            channel.off_prediction(listener);
        }
        self.lesson_channel.disconnect().await;
        if let Some(channel) = &self.spelling_channel {
            channel.disconnect().await;
        }
        self.deadline = None;
        forwarders.cancel();
        for task in status_tasks {
            let _ = task.await;
        }

        let elapsed = self.started.elapsed();
        let (user, stage) = (self.deps.user_id.clone(), self.stage.clone());
        self.persist("update elapsed time", move |store| {
            let (user, stage) = (user.clone(), stage.clone());
            async move { store.update_elapsed_time(&user, &stage, elapsed).await }
        });
        while let Some(joined) = self.writes.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Progress write task failed");
            }
        }

        info!(
            session = %self.id,
            stage = %self.stage,
            end = ?end,
            elapsed_secs = elapsed.as_secs(),
            frames = self.frames,
            sent = self.requests_sent,
            "Lesson session ended"
        );

        Ok(SessionReport {
            session_id: self.id,
            end,
            snapshot: self.progression.snapshot(),
            elapsed,
            frames: self.frames,
            requests_sent: self.requests_sent,
        })
    }

    fn on_frame(&mut self, frame: &LandmarkFrame) {
        self.frames += 1;
        let spelling = self.progression.active_source() == PredictionSource::Spelling;
        let target = self.progression.current_label().map(str::to_string);
        let accepting = self.progression.accepting_input();

        let active = (spelling, &mut self.spelling_pipeline, &self.spelling_channel);
        let (pipeline, channel) = match active {
            (true, Some(pipeline), Some(channel)) => (pipeline, channel),
            _ => (&mut self.lesson_pipeline, &self.lesson_channel),
        };
        let outcome = pipeline.process(frame, target.as_deref(), Instant::now());

        let presence = (
            outcome.presence.left_hand,
            outcome.presence.right_hand,
            outcome.gate.is_some_and(|g| g.stable),
        );
        let presence_changed = self.last_presence != Some(presence);
        if let Some((filled, length)) = outcome.fill {
            self.deps.bus.publish(LessonEvent::BufferProgress {
                filled,
                length,
                timestamp: chrono::Utc::now(),
            });
        }

        let mut sent = false;
        if let Some(request) = outcome.request {
            if accepting {
                match channel.send(&request) {
                    SendOutcome::Sent => sent = true,
                    outcome => {
                        debug!(domain = %channel.domain(), outcome = ?outcome, "Request not sent")
                    }
                }
            } else {
                debug!(frames = request.frame_count(), "Request withheld while advancing");
            }
        }

        if sent {
            self.requests_sent += 1;
        }
        if presence_changed {
            self.last_presence = Some(presence);
            self.deps.bus.publish(LessonEvent::HandPresence {
                left: presence.0,
                right: presence.1,
                stable: presence.2,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn on_prediction(&mut self, source: PredictionSource, event: PredictionEvent) {
        let domain = match source {
            PredictionSource::Lesson => self.lesson_channel.domain(),
            PredictionSource::Spelling => self
                .spelling_channel
                .as_ref()
                .map_or(Domain::Spelling, |c| c.domain()),
        };
        let matched = source == self.progression.active_source()
            && self
                .progression
                .current_label()
                .is_some_and(|label| label.trim().eq_ignore_ascii_case(event.label.trim()));
        debug!(
            domain = %domain,
            label = %event.label,
            confidence = event.confidence,
            matched,
            "Prediction received"
        );
        self.deps.bus.publish(LessonEvent::PredictionReceived {
            domain,
            label: event.label.clone(),
            confidence: event.confidence,
            matched,
            timestamp: chrono::Utc::now(),
        });

        let effects = self.progression.on_prediction(source, &event);
        self.apply(effects);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Skip(reply) => {
                let result = self.progression.skip();
                let _ = reply.send(self.navigated(result));
            }
            Command::Previous(reply) => {
                let result = self.progression.previous();
                let _ = reply.send(self.navigated(result));
            }
            Command::Jump(index, reply) => {
                let result = self.progression.jump(index);
                let _ = reply.send(self.navigated(result));
            }
            Command::SkipLetter(reply) => {
                let effects = self.progression.skip_letter();
                self.apply(effects);
                let _ = reply.send(());
            }
            Command::Reset(reply) => {
                self.progression.reset();
                self.deadline = None;
                self.reset_pipelines();
                info!(stage = %self.stage, "Lesson reset");
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.progression.snapshot());
            }
        }
    }

    fn navigated(
        &mut self,
        result: Result<Vec<Effect>, NavigationError>,
    ) -> Result<(), NavigationError> {
        match result {
            Ok(effects) => {
                self.apply(effects);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Navigation rejected");
                Err(e)
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.apply_one(effect);
        }
    }

    fn apply_one(&mut self, effect: Effect) {
        let now = chrono::Utc::now();
        match effect {
            Effect::AttemptRecorded { target, correct } => {
                let outcome = if correct {
                    AttemptOutcome::Correct
                } else {
                    AttemptOutcome::Incorrect
                };
                let (user, stage) = (self.deps.user_id.clone(), self.stage.clone());
                self.persist("record attempt", move |store| {
                    let (user, stage, id) = (user.clone(), stage.clone(), target.id.clone());
                    async move { store.record_attempt(&user, &stage, &id, outcome).await }
                });
            }
            Effect::TargetCompleted {
                target,
                completed,
                total,
            } => {
                self.deps.bus.publish(LessonEvent::TargetCompleted {
                    stage: self.stage.clone(),
                    target: target.label.clone(),
                    completed,
                    total,
                    timestamp: now,
                });
                self.persist_completion(Some(target.id));
            }
            Effect::CelebrationStarted { ticket, delay } => {
                self.deadline = Some((Instant::now() + delay, ticket));
            }
            Effect::Advanced { index, target } => {
                self.reset_pipelines();
                self.deps.bus.publish(LessonEvent::TargetAdvanced {
                    index,
                    target: target.label,
                    timestamp: now,
                });
            }
            Effect::StageCompleted => {
                let elapsed_secs = self.started.elapsed().as_secs();
                info!(stage = %self.stage, elapsed_secs, "Stage completed");
                self.deps.bus.publish(LessonEvent::StageCompleted {
                    stage: self.stage.clone(),
                    elapsed_secs,
                    timestamp: now,
                });
                self.persist_completion(None);
            }
            Effect::SpellingStarted { name } => {
                if let Some(pipeline) = &mut self.spelling_pipeline {
                    pipeline.reset();
                }
                self.deps
                    .bus
                    .publish(LessonEvent::SpellingStarted { name, timestamp: now });
            }
            Effect::LetterCompleted { position, letter } => {
                self.deps.bus.publish(LessonEvent::LetterCompleted {
                    position,
                    letter,
                    timestamp: now,
                });
            }
            Effect::LetterAdvanced { position, letter } => {
                if let Some(pipeline) = &mut self.spelling_pipeline {
                    pipeline.reset();
                }
                debug!(position, letter = %letter, "Next letter");
            }
            Effect::SpellingFinished { name } => {
                self.lesson_pipeline.reset();
                self.deps
                    .bus
                    .publish(LessonEvent::SpellingFinished { name, timestamp: now });
            }
            Effect::SpellingRequested { sentinel } => {
                warn!(sentinel = %sentinel.id, "Unhandled spelling request");
            }
        }
    }

    fn reset_pipelines(&mut self) {
        self.lesson_pipeline.reset();
        if let Some(pipeline) = &mut self.spelling_pipeline {
            pipeline.reset();
        }
        self.last_presence = None;
    }

    /// Mark a target (or, with `None`, the stage) complete, then award badges.
    fn persist_completion(&mut self, target_id: Option<String>) {
        let store = self.deps.store.clone();
        let bus = self.deps.bus.clone();
        let policy = self.options.store_retry.clone();
        let (user, stage) = (self.deps.user_id.clone(), self.stage.clone());

        self.writes.spawn(async move {
            let marked = match &target_id {
                Some(id) => {
                    retry(&policy, "mark target complete", |_| {
                        store.mark_target_complete(&user, &stage, id)
                    })
                    .await
                }
                None => {
                    retry(&policy, "mark stage complete", |_| {
                        store.mark_stage_complete(&user, &stage)
                    })
                    .await
                }
            };
            if let Err(e) = marked {
                warn!(stage = %stage, target = ?target_id, error = %e, "Completion not persisted");
                return;
            }

            let badges = retry(&policy, "evaluate badges", |_| {
                store.evaluate_badges(&user, &stage)
            })
            .await;
            match badges {
                Ok(badges) => {
                    for badge in badges {
                        info!(badge = %badge, "Badge awarded");
                        bus.publish(LessonEvent::BadgeAwarded {
                            badge,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                Err(e) => warn!(stage = %stage, error = %e, "Badge evaluation failed"),
            }
        });
    }

    fn persist<F, Fut>(&mut self, what: &'static str, op: F)
    where
        F: Fn(Arc<dyn ProgressStore>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<()>> + Send + 'static,
    {
        let store = self.deps.store.clone();
        let policy = self.options.store_retry.clone();
        self.writes.spawn(async move {
            if let Err(e) = retry(&policy, what, |_| op(store.clone())).await {
                warn!(what, error = %e, "Progress write dropped");
            }
        });
    }
}

async fn start_source<S: FrameSource + ?Sized>(
    source: &mut S,
    policy: &RetryPolicy,
) -> Result<(), SessionError> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match source.start().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                let delay = policy.backoff_duration(attempt + 1);
                warn!(attempt, error = %e, "Frame source failed to start, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(attempts, error = %e, "Frame source unavailable");
                return Err(SessionError::FrameSource(e));
            }
        }
    }
}

fn forward_status(
    channel: &RecognitionChannel,
    bus: SharedLessonEventBus,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let domain = channel.domain();
    let mut status = channel.watch_status();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current: ChannelStatus = *status.borrow_and_update();
                    bus.publish(LessonEvent::ChannelStatusChanged {
                        domain,
                        status: current,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }
    })
}

async fn recv_opt(listener: &mut Option<PredictionListener>) -> Option<PredictionEvent> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
