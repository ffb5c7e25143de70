use qr_gate_common::frame::rgba_len;
use tracing::debug;

use super::traits::{DecodeError, Decoder};

/// QR decoder backed by `rqrr`.
///
/// The frame is reduced to 8-bit luma and searched for finder patterns. Only
/// the first grid that decodes is reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for QrDecoder {
    fn decode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<String>, DecodeError> {
        let expected = rgba_len(width, height);
        if pixels.len() != expected {
            return Err(DecodeError::BufferSize {
                got: pixels.len(),
                expected,
            });
        }
        if expected == 0 {
            return Ok(None);
        }

        let luma: Vec<u8> = pixels
            .chunks_exact(4)
            .map(|px| to_luma(px[0], px[1], px[2]))
            .collect();
        let w = width as usize;
        let mut img =
            rqrr::PreparedImage::prepare_from_greyscale(w, height as usize, |x, y| luma[y * w + x]);

        let grids = img.detect_grids();
        for grid in &grids {
            match grid.decode() {
                Ok((_meta, content)) => return Ok(Some(content)),
                Err(e) => debug!(error = ?e, "QR grid detected but not decodable"),
            }
        }
        Ok(None)
    }

    fn name(&self) -> &str {
        "qr"
    }
}

/// ITU-R BT.601 luma.
fn to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
