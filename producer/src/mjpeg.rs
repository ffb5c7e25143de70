use bytes::BytesMut;
use futures_util::StreamExt;
use qr_gate_common::config::CameraConfig;
use qr_gate_common::frame::{FrameSource, SourceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::slot::{decode_image, LatestFrame};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Acquisition parameters shared by the camera sources.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub max_dimension: u32,
    pub connect_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_dimension: 500,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&CameraConfig> for CaptureOptions {
    fn from(config: &CameraConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` MJPEG body.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one chunk of the HTTP body; returns every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Resume the scan near the tail next time.
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !jpeg.is_empty() {
                        frames.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }
}

/// Live frame source fed by an MJPEG HTTP stream.
///
/// The reader task keeps the newest decoded frame in a [`LatestFrame`] slot
/// and reconnects with exponential backoff when the stream drops. Dropping
/// the source stops the reader.
pub struct MjpegSource {
    slot: Arc<LatestFrame>,
    reader: JoinHandle<()>,
}

impl MjpegSource {
    /// Open the stream. Fails if the camera cannot be reached or answers with
    /// a non-success status; no reader is started in that case.
    pub async fn connect(url: &str, options: CaptureOptions) -> Result<Self, SourceError> {
        let client = build_client(&options)?;
        let response = open_stream(&client, url).await?;
        info!(url, status = %response.status(), "connected to MJPEG stream");

        let slot = Arc::new(LatestFrame::new(format!("mjpeg:{url}")));
        let reader = tokio::spawn(run_mjpeg_reader(
            client,
            url.to_string(),
            Some(response),
            Arc::clone(&slot),
            options.max_dimension,
        ));
        Ok(Self { slot, reader })
    }
}

impl Drop for MjpegSource {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl FrameSource for MjpegSource {
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

pub(crate) fn build_client(options: &CaptureOptions) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .build()
        .map_err(|e| SourceError::Connect(e.to_string()))
}

async fn open_stream(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response, SourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Connect(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }
    Ok(response)
}

/// Consume the stream, reconnecting with exponential backoff on failure.
async fn run_mjpeg_reader(
    client: reqwest::Client,
    url: String,
    mut first: Option<reqwest::Response>,
    slot: Arc<LatestFrame>,
    max_dimension: u32,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let response = match first.take() {
            Some(r) => Ok(r),
            None => {
                info!(url = %url, "reconnecting to MJPEG stream");
                open_stream(&client, &url).await
            }
        };
        let result = match response {
            Ok(r) => consume_stream(r, &slot, max_dimension).await,
            Err(e) => Err(e),
        };
        slot.clear();

        match result {
            Ok(()) => {
                info!(url = %url, "stream ended cleanly, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                error!(error = %e, url = %url, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn consume_stream(
    response: reqwest::Response,
    slot: &LatestFrame,
    max_dimension: u32,
) -> Result<(), SourceError> {
    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();
    let mut frames: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| SourceError::Stream(e.to_string()))?;
        for jpeg in parser.push(&chunk) {
            match decode_image(&jpeg, max_dimension) {
                Ok(frame) => {
                    frames += 1;
                    if frames % 100 == 0 {
                        debug!(frames, "frames received");
                    }
                    slot.publish(frame);
                }
                Err(e) => {
                    warn!(error = %e, bytes = jpeg.len(), "failed to decode MJPEG part, skipping");
                }
            }
        }
    }

    Ok(())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
