use qr_gate_common::verdict::FeedbackCue;
use tracing::info;

/// Receives one-shot cues when the match status turns decided.
pub trait FeedbackSink: Send + Sync {
    fn cue(&self, cue: FeedbackCue);
}

/// Feedback sink that only logs; for headless deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn cue(&self, cue: FeedbackCue) {
        match cue {
            FeedbackCue::Accept => info!(cue = "accept", "code matches target"),
            FeedbackCue::Reject => info!(cue = "reject", "code does not match target"),
        }
    }
}
