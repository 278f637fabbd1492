//! Console rendering of lesson events.

use recognition::LessonEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// One console line for an event, or `None` for events not worth printing.
///
/// Buffer progress only prints at each quarter so a sequence lesson does not
/// scroll the terminal every frame.
pub fn render(event: &LessonEvent) -> Option<String> {
    let line = match event {
        LessonEvent::ChannelStatusChanged { domain, status, .. } => {
            format!("[{domain}] channel {status}")
        }
        LessonEvent::HandPresence {
            left,
            right,
            stable,
            ..
        } => {
            let hands = match (left, right) {
                (true, true) => "both hands",
                (true, false) => "left hand",
                (false, true) => "right hand",
                (false, false) => "no hands",
            };
            if *stable {
                format!("{hands} (steady)")
            } else {
                hands.to_string()
            }
        }
        LessonEvent::BufferProgress { filled, length, .. } => {
            if *length == 0 || *filled == 0 || (filled * 4) % length != 0 {
                return None;
            }
            format!("capturing {}%", filled * 100 / length)
        }
        LessonEvent::PredictionReceived {
            label,
            confidence,
            matched,
            ..
        } => {
            let mark = if *matched { "+" } else { " " };
            format!("{mark} saw {label:?} ({:.0}%)", confidence * 100.0)
        }
        LessonEvent::TargetCompleted {
            target,
            completed,
            total,
            ..
        } => format!("✓ {target} ({completed}/{total})"),
        LessonEvent::TargetAdvanced { index, target, .. } => {
            format!("next: {target} (#{})", index + 1)
        }
        LessonEvent::SpellingStarted { name, .. } => format!("spell your name: {name}"),
        LessonEvent::LetterCompleted {
            position, letter, ..
        } => format!("  letter {} {letter} ✓", position + 1),
        LessonEvent::SpellingFinished { name, .. } => format!("spelled {name}"),
        LessonEvent::StageCompleted {
            stage,
            elapsed_secs,
            ..
        } => format!("stage {stage} complete in {elapsed_secs}s"),
        LessonEvent::BadgeAwarded { badge, .. } => format!("badge earned: {badge}"),
    };
    Some(line)
}

/// Print events until the bus closes or the task is aborted.
pub fn spawn_presenter(mut events: broadcast::Receiver<LessonEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Presenter fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
