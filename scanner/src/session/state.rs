use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use qr_gate_common::frame::{FrameSource, PixelBuffer};
use qr_gate_common::verdict::{evaluate, MatchStatus};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decode::Decoder;
use crate::sampler::{FrameSampler, SamplerError};

use super::feedback::FeedbackSink;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

/// The latest published status. Only the newest one is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: MatchStatus,
    pub target: String,
    /// Raw decoded payload of the tick, for diagnostics.
    pub decoded: Option<String>,
    /// Tick number within the current sampling run; 0 before the first tick.
    pub tick: u64,
    pub updated_at_ms: i64,
}

impl StatusUpdate {
    fn idle() -> Self {
        Self {
            status: MatchStatus::NoTarget,
            target: String::new(),
            decoded: None,
            tick: 0,
            updated_at_ms: Utc::now().timestamp_millis(),
        }
    }

    fn searching(target: &str) -> Self {
        Self {
            status: MatchStatus::Searching,
            target: target.to_string(),
            decoded: None,
            tick: 0,
            updated_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn text(&self) -> String {
        self.status.status_text(&self.target)
    }

    pub fn border(&self) -> Option<&'static str> {
        self.status.border_color()
    }
}

/// Lifecycle glue between the target selection, the sampler and the
/// presentation boundary.
///
/// `NoTarget` (idle) while the target is empty; otherwise the sampler runs
/// and every tick overwrites the status with the verdict for that tick
/// alone.
pub struct ScanSession {
    source: Arc<dyn FrameSource>,
    decoder: Arc<dyn Decoder>,
    feedback: Arc<dyn FeedbackSink>,
    sampler: FrameSampler,
    interval: Duration,
    target: String,
    updates: Arc<watch::Sender<StatusUpdate>>,
}

impl ScanSession {
    /// Create an idle session over an already acquired frame source.
    pub fn new(
        source: Arc<dyn FrameSource>,
        decoder: Arc<dyn Decoder>,
        feedback: Arc<dyn FeedbackSink>,
        interval: Duration,
    ) -> Result<Self, SessionError> {
        if interval.is_zero() {
            return Err(SamplerError::ZeroInterval.into());
        }
        let (updates, _) = watch::channel(StatusUpdate::idle());
        Ok(Self {
            source,
            decoder,
            feedback,
            sampler: FrameSampler::new(),
            interval,
            target: String::new(),
            updates: Arc::new(updates),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    pub fn current(&self) -> StatusUpdate {
        self.updates.borrow().clone()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }

    /// Apply a new target value.
    ///
    /// - empty: stop sampling, status `NoTarget`
    /// - same as the running target: nothing changes
    /// - anything else: restart sampling at a fresh cadence, status
    ///   `Searching` until the next tick
    pub fn set_target(&mut self, target: impl Into<String>) -> Result<(), SessionError> {
        let target = target.into();

        if target.is_empty() {
            let stopped = self.sampler.stop();
            self.target.clear();
            info!(stopped, "target cleared, session idle");
            self.updates.send_replace(StatusUpdate::idle());
            return Ok(());
        }

        if target == self.target && self.sampler.is_running() {
            debug!(selected = %target, "target unchanged, keeping current sampler");
            return Ok(());
        }

        info!(from = %self.target, to = %target, "target selected");
        self.target = target;
        self.restart_sampling()
    }

    /// Change the sampling cadence. A running sampler restarts at the new
    /// interval.
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), SessionError> {
        if interval.is_zero() {
            return Err(SamplerError::ZeroInterval.into());
        }
        self.interval = interval;
        if self.sampler.is_running() {
            info!(interval_ms = interval.as_millis() as u64, "sampling interval changed");
            self.restart_sampling()?;
        }
        Ok(())
    }

    /// Stop sampling for good; the session reports `NoTarget` afterwards.
    pub fn shutdown(&mut self) {
        self.sampler.stop();
        self.target.clear();
        self.updates.send_replace(StatusUpdate::idle());
        info!("scan session shut down");
    }

    fn restart_sampling(&mut self) -> Result<(), SessionError> {
        // The old run must be fully cancelled before Searching is published,
        // otherwise one of its ticks could overwrite it with a stale verdict.
        self.sampler.stop();
        self.updates
            .send_replace(StatusUpdate::searching(&self.target));

        let on_frame = tick_handler(
            self.target.clone(),
            Arc::clone(&self.decoder),
            Arc::clone(&self.feedback),
            Arc::clone(&self.updates),
        );
        self.sampler
            .start(Arc::clone(&self.source), self.interval, on_frame)?;
        Ok(())
    }
}

/// Build the per-run tick consumer: decode, classify, publish, cue.
fn tick_handler(
    target: String,
    decoder: Arc<dyn Decoder>,
    feedback: Arc<dyn FeedbackSink>,
    updates: Arc<watch::Sender<StatusUpdate>>,
) -> impl FnMut(PixelBuffer) + Send + 'static {
    let mut tick: u64 = 0;
    move |frame: PixelBuffer| {
        tick += 1;
        let decoded = decode_frame(decoder.as_ref(), &frame);
        let status = MatchStatus::from(evaluate(decoded.as_deref(), &target));

        let previous = updates.borrow().status;
        debug!(
            tick,
            decoded = decoded.as_deref().unwrap_or(""),
            status = ?status,
            "tick evaluated"
        );
        updates.send_replace(StatusUpdate {
            status,
            target: target.clone(),
            decoded,
            tick,
            updated_at_ms: Utc::now().timestamp_millis(),
        });

        if status != previous {
            if let Some(cue) = status.cue() {
                feedback.cue(cue);
            }
        }
    }
}

/// Run the decoder; errors and panics count as "no code found".
fn decode_frame(decoder: &dyn Decoder, frame: &PixelBuffer) -> Option<String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        decoder.decode(frame.data(), frame.width(), frame.height())
    }));
    match result {
        Ok(Ok(decoded)) => decoded,
        Ok(Err(e)) => {
            warn!(error = %e, decoder = decoder.name(), "decode failed, treating as no code");
            None
        }
        Err(_) => {
            warn!(decoder = decoder.name(), "decoder panicked, treating as no code");
            None
        }
    }
}
