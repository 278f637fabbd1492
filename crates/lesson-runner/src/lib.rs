//! Lesson Runner
//!
//! Drives one lesson from a recorded frame file:
//! - Loads the lesson TOML and resolves endpoints (`SIGN_<DOMAIN>_URL` overrides)
//! - Replays NDJSON landmark frames at a fixed rate
//! - Connects to the classifier backends over TCP
//! - Prints presentation events to the console
//!
//! # Usage
//!
//! ```bash
//! lesson-runner --lesson lessons/alphabet.toml --frames capture.ndjson --fps 30
//!
//! # Spell a specific name and keep progress off disk
//! lesson-runner --lesson lessons/intro.toml --frames intro.ndjson --user-name Ana --dry-run
//! ```

pub mod cli;
pub mod config;
pub mod presenter;
pub mod replay;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use recognition::{
    FrameSource, JsonFileProgressStore, LessonConfig, LessonEventBus, LessonSession,
    MemoryProgressStore, ProgressStore, ResolvedLesson, SessionDeps, SessionOptions,
    SessionReport, TcpConnector,
};
use tracing::info;

pub use cli::Args;
pub use config::RunnerConfig;
pub use presenter::{render, spawn_presenter};
pub use replay::NdjsonReplay;

/// How long the presenter gets to print the tail of the event stream.
const PRESENTER_DRAIN: Duration = Duration::from_millis(250);

/// Load everything named by `args` and run the lesson until it ends or `shutdown` resolves.
pub async fn run(
    args: &Args,
    config: &RunnerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<SessionReport> {
    let lesson = LessonConfig::load(&args.lesson)
        .with_context(|| format!("Failed to load lesson {}", args.lesson.display()))?;
    let user_name = args.user_name.as_deref().or(config.user_name.as_deref());
    let resolved = lesson.resolve(user_name);

    let store: Arc<dyn ProgressStore> = if args.dry_run {
        info!("Dry run, progress stays in memory");
        Arc::new(MemoryProgressStore::new())
    } else {
        Arc::new(JsonFileProgressStore::new(&config.progress_dir))
    };

    let deps = SessionDeps {
        user_id: config.user_id.clone(),
        store,
        bus: LessonEventBus::new().shared(),
        connector: Arc::new(TcpConnector::default()),
    };
    let mut source = NdjsonReplay::new(&args.frames, args.fps);
    let report = run_lesson(resolved, deps, &mut source, shutdown).await?;
    if source.skipped() > 0 {
        info!(skipped = source.skipped(), "Some frames could not be parsed");
    }
    Ok(report)
}

/// Run a resolved lesson against any frame source, printing events as they arrive.
pub async fn run_lesson<S: FrameSource>(
    resolved: ResolvedLesson,
    deps: SessionDeps,
    source: &mut S,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<SessionReport> {
    let mut presenter = spawn_presenter(deps.bus.subscribe());
    info!(
        stage = %resolved.stage,
        domain = %resolved.lesson.domain,
        endpoint = %resolved.lesson.endpoint,
        targets = resolved.targets.len(),
        "Starting lesson"
    );

    let (session, handle) = LessonSession::open(resolved, deps, SessionOptions::default()).await;
    let token = handle.cancellation_token();
    let watcher = tokio::spawn(async move {
        shutdown.await;
        info!("Shutdown requested, tearing down session");
        token.cancel();
    });

    let result = session.run(source).await;
    watcher.abort();

    let _ = tokio::time::timeout(PRESENTER_DRAIN, &mut presenter).await;
    presenter.abort();

    result.context("Lesson session failed")
}
