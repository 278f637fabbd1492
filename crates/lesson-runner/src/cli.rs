use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Lesson definition (TOML)
    #[arg(long)]
    pub lesson: PathBuf,

    /// Recorded landmark frames, one JSON object per line
    #[arg(long)]
    pub frames: PathBuf,

    /// Replay rate in frames per second
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub fps: u32,

    /// Learner name to spell (overrides SIGN_USER_NAME)
    #[arg(long)]
    pub user_name: Option<String>,

    /// Keep progress in memory instead of writing it to SIGN_PROGRESS_DIR
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([
            "lesson-runner",
            "--lesson",
            "lesson.toml",
            "--frames",
            "frames.ndjson",
        ])
        .unwrap();
        assert_eq!(args.fps, 30);
        assert!(!args.dry_run);
        assert!(args.user_name.is_none());
    }

    #[test]
    fn test_rejects_zero_fps() {
        let result = Args::try_parse_from([
            "lesson-runner",
            "--lesson",
            "l.toml",
            "--frames",
            "f.ndjson",
            "--fps",
            "0",
        ]);
        assert!(result.is_err());
    }
}
