/// Bytes per pixel in a [`PixelBuffer`] (RGBA).
pub const BYTES_PER_PIXEL: usize = 4;

/// An immutable RGBA snapshot of one sampled frame.
///
/// Buffers are produced fresh on every sampling tick and handed to the
/// decoder by value; nothing keeps them after the tick completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes. Fails if either dimension is zero or the byte
    /// count does not equal `width * height * 4`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimensions { width, height });
        }
        let expected = rgba_len(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Number of bytes an RGBA surface of the given size occupies.
pub fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// A live frame producer that can be read on demand.
///
/// Implementations are read-only from the sampler's point of view: the
/// sampler asks for the current intrinsic size, allocates a surface of that
/// size and asks the source to render its current frame into it.
pub trait FrameSource: Send + Sync {
    /// Current intrinsic `(width, height)`. `(0, 0)` means the source has
    /// no frame yet.
    fn dimensions(&self) -> (u32, u32);

    /// Render the current frame into `buf`, an RGBA surface of exactly
    /// `width * height * 4` bytes.
    fn render_into(&self, buf: &mut [u8], width: u32, height: u32) -> Result<(), SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has zero dimensions: {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },
    #[error("pixel data size mismatch: got {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("frame source not ready ({width}x{height})")]
    NotReady { width: u32, height: u32 },
    #[error("failed to render frame: {0}")]
    Render(String),
    #[error("failed to connect to camera: {0}")]
    Connect(String),
    #[error("camera returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("camera stream error: {0}")]
    Stream(String),
    #[error("failed to decode camera image: {0}")]
    Decode(String),
}
