//! NDJSON replay of recorded detector output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use recognition::{FrameSource, FrameSourceError, LandmarkFrame};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Plays a file of one-frame-per-line JSON at a fixed rate.
///
/// Blank lines are skipped. Lines that fail to parse are logged and
/// skipped, so one corrupt record does not end a replay.
pub struct NdjsonReplay {
    path: PathBuf,
    period: Duration,
    lines: Option<Lines<BufReader<File>>>,
    ticker: Option<Interval>,
    line_no: usize,
    skipped: usize,
}

impl NdjsonReplay {
    pub fn new(path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            path: path.into(),
            period: Duration::from_secs(1) / fps.max(1),
            lines: None,
            ticker: None,
            line_no: 0,
            skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Lines that could not be parsed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    async fn read_frame(&mut self) -> Option<LandmarkFrame> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Frame file read failed");
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LandmarkFrame>(&line) {
                Ok(frame) => return Some(frame),
                Err(source) => {
                    self.skipped += 1;
                    let e = FrameSourceError::Parse {
                        line: self.line_no,
                        source,
                    };
                    warn!(error = %e, "Skipping frame");
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for NdjsonReplay {
    async fn start(&mut self) -> Result<(), FrameSourceError> {
        let file = File::open(&self.path).await?;
        self.lines = Some(BufReader::new(file).lines());
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.line_no = 0;
        info!(
            path = %self.path.display(),
            period_ms = self.period.as_millis() as u64,
            "Replay started"
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<LandmarkFrame> {
        self.ticker.as_mut()?.tick().await;
        self.read_frame().await
    }

    async fn stop(&mut self) {
        if self.lines.take().is_some() {
            debug!(lines = self.line_no, skipped = self.skipped, "Replay stopped");
        }
        self.ticker = None;
    }
}
