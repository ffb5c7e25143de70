use std::sync::{PoisonError, RwLock};

use image::imageops::FilterType;
use image::{ImageBuffer, Rgba};
use qr_gate_common::frame::{rgba_len, FrameSource, PixelBuffer, SourceError};
use tracing::debug;

/// Holds the newest frame delivered by a camera reader task.
///
/// Reader tasks publish into the slot; the sampler reads it through the
/// [`FrameSource`] impl. An empty slot reports `(0, 0)` so ticks are skipped
/// until the first frame arrives and again after a disconnect.
pub struct LatestFrame {
    name: String,
    frame: RwLock<Option<PixelBuffer>>,
}

impl LatestFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame: RwLock::new(None),
        }
    }

    pub fn publish(&self, frame: PixelBuffer) {
        *self.frame.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn clear(&self) {
        *self.frame.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_ready(&self) -> bool {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl FrameSource for LatestFrame {
    fn dimensions(&self) -> (u32, u32) {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0))
    }

    fn render_into(&self, buf: &mut [u8], width: u32, height: u32) -> Result<(), SourceError> {
        if buf.len() != rgba_len(width, height) {
            return Err(SourceError::Render(format!(
                "surface is {} bytes, expected {} for {width}x{height}",
                buf.len(),
                rgba_len(width, height)
            )));
        }
        let guard = self.frame.read().unwrap_or_else(PoisonError::into_inner);
        let frame = guard.as_ref().ok_or(SourceError::NotReady { width: 0, height: 0 })?;

        if frame.width() == width && frame.height() == height {
            buf.copy_from_slice(frame.data());
            return Ok(());
        }

        // The camera changed resolution between the size query and the
        // render call; scale into the surface the caller allocated.
        debug!(
            from_w = frame.width(),
            from_h = frame.height(),
            to_w = width,
            to_h = height,
            "scaling frame to requested surface"
        );
        let src =
            ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(frame.width(), frame.height(), frame.data())
                .ok_or_else(|| SourceError::Render("frame buffer too small".into()))?;
        let scaled = image::imageops::resize(&src, width, height, FilterType::Triangle);
        buf.copy_from_slice(scaled.as_raw());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decode a JPEG (or any format the `image` crate detects) into an RGBA
/// buffer, shrinking it to fit within `max_dimension` on both axes.
pub fn decode_image(bytes: &[u8], max_dimension: u32) -> Result<PixelBuffer, SourceError> {
    let img = image::load_from_memory(bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        img
    };
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelBuffer::new(width, height, rgba.into_raw()).map_err(|e| SourceError::Decode(e.to_string()))
}
