use qr_gate_common::config::poll_period;
use qr_gate_common::frame::{FrameSource, SourceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::mjpeg::{build_client, CaptureOptions};
use crate::slot::{decode_image, LatestFrame};

/// Polling-based fallback: periodically fetch single JPEG snapshots.
pub struct PollingSource {
    slot: Arc<LatestFrame>,
    poller: JoinHandle<()>,
}

impl PollingSource {
    /// Fetch one snapshot to prove the camera is reachable, then keep
    /// polling at `fps` in the background.
    pub async fn connect(
        frame_url: &str,
        fps: f64,
        options: CaptureOptions,
    ) -> Result<Self, SourceError> {
        let period = poll_period(fps)
            .ok_or_else(|| SourceError::Connect(format!("invalid polling rate {fps}")))?;
        let client = build_client(&options)?;
        let slot = Arc::new(LatestFrame::new(format!("polling:{frame_url}")));

        let first = fetch_snapshot(&client, frame_url).await?;
        match decode_image(&first, options.max_dimension) {
            Ok(frame) => slot.publish(frame),
            Err(e) => warn!(error = %e, "first camera snapshot did not decode"),
        }

        let poller = tokio::spawn(run_poller(
            client,
            frame_url.to_string(),
            period,
            Arc::clone(&slot),
            options.max_dimension,
        ));
        Ok(Self { slot, poller })
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl FrameSource for PollingSource {
    fn dimensions(&self) -> (u32, u32) {
        self.slot.dimensions()
    }

    fn render_into(&self, buf: &mut [u8], width: u32, height: u32) -> Result<(), SourceError> {
        self.slot.render_into(buf, width, height)
    }

    fn name(&self) -> &str {
        self.slot.name()
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, SourceError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Connect(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(SourceError::HttpStatus(resp.status().as_u16()));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| SourceError::Stream(e.to_string()))?;
    Ok(bytes.to_vec())
}

async fn run_poller(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    slot: Arc<LatestFrame>,
    max_dimension: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The connect call already delivered a frame for this period.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match fetch_snapshot(&client, &url).await {
            Ok(jpeg) => match decode_image(&jpeg, max_dimension) {
                Ok(frame) => slot.publish(frame),
                Err(e) => warn!(error = %e, "failed to decode camera snapshot"),
            },
            Err(e) => {
                warn!(error = %e, url = %url, "failed to fetch camera frame");
                slot.clear();
            }
        }
    }
}
