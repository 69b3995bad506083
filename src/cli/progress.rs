// src/cli/progress.rs — Terminal progress renderer for the live loop
//
// All progress output goes to stderr so stdout stays clean for the result.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::core::types::{LoopSnapshot, LoopStatus};

/// Lines to print for `snapshot`, given how many history entries were
/// already shown. Returns the new count alongside the lines.
pub fn render_update(snapshot: &LoopSnapshot, shown: usize, max_rounds: u8) -> (Vec<String>, usize) {
    let mut lines: Vec<String> = snapshot
        .history
        .iter()
        .skip(shown)
        .map(|entry| format!("  {entry}"))
        .collect();

    if let Some(label) = status_label(snapshot.status) {
        lines.push(format!("[round {}/{max_rounds}] {label}...", snapshot.round));
    }
    (lines, snapshot.history.len())
}

fn status_label(status: LoopStatus) -> Option<&'static str> {
    match status {
        LoopStatus::CollectingDrafts => Some("collecting drafts"),
        LoopStatus::Integrating => Some("integrating"),
        LoopStatus::CollectingFeedback => Some("collecting feedback"),
        LoopStatus::Evaluating => Some("evaluating"),
        LoopStatus::Idle | LoopStatus::Complete | LoopStatus::Stopped => None,
    }
}

pub fn render_done(snapshot: &LoopSnapshot) -> String {
    let reason = snapshot
        .stop_reason
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".into());
    match snapshot.best_score {
        Some(score) => format!(
            "[{}] round={} best={score:.2} ({reason})",
            snapshot.status, snapshot.round
        ),
        None => format!("[{}] round={} ({reason})", snapshot.status, snapshot.round),
    }
}

/// Print snapshots until the loop reaches a terminal state or the sender
/// goes away.
pub async fn follow(mut rx: broadcast::Receiver<LoopSnapshot>, max_rounds: u8) {
    let mut shown = 0;
    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                let (lines, next) = render_update(&snapshot, shown, max_rounds);
                shown = next;
                for line in lines {
                    eprintln!("{line}");
                }
                if snapshot.status.is_terminal() {
                    eprintln!("{}", render_done(&snapshot));
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress renderer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
