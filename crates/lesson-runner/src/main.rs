use anyhow::Result;
use clap::Parser;
use lesson_runner::{run, Args, RunnerConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = RunnerConfig::default();
    info!(
        user = %config.user_id,
        progress_dir = %config.progress_dir.display(),
        dry_run = args.dry_run,
        "Lesson runner starting"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let report = run(&args, &config, shutdown).await?;
    let snapshot = &report.snapshot;
    println!(
        "{:?}: {}/{} targets complete in {}s ({} frames, {} requests)",
        report.end,
        snapshot.completed.len(),
        snapshot.total,
        report.elapsed.as_secs(),
        report.frames,
        report.requests_sent,
    );

    Ok(())
}
