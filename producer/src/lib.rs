//! Camera acquisition: HTTP frame sources that keep the newest camera frame
//! available for on-demand sampling.

pub mod mjpeg;
pub mod polling;
pub mod slot;

use std::sync::Arc;

use qr_gate_common::config::CameraConfig;
use qr_gate_common::frame::{FrameSource, SourceError};
use tracing::info;

pub use mjpeg::{CaptureOptions, MjpegSource};
pub use polling::PollingSource;
pub use slot::LatestFrame;

/// Acquire the camera described by `config`.
///
/// Acquisition failures are returned to the caller; nothing retries here.
pub async fn open_camera(config: &CameraConfig) -> Result<Arc<dyn FrameSource>, SourceError> {
    let options = CaptureOptions::from(config);
    info!(url = %config.url, mode = %config.mode, "acquiring camera");
    let source: Arc<dyn FrameSource> = match config.mode.as_str() {
        "mjpeg" => Arc::new(MjpegSource::connect(&config.url, options).await?),
        "polling" => Arc::new(PollingSource::connect(&config.url, config.fps, options).await?),
        other => {
            return Err(SourceError::Connect(format!(
                "unknown camera mode '{other}', expected 'mjpeg' or 'polling'"
            )))
        }
    };
    Ok(source)
}
