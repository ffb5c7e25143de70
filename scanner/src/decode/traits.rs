/// Optical-code decoder interface.
///
/// Implementations receive an RGBA frame and return the payload of the code
/// found in it, or `None` when the frame holds no readable code. Each call
/// is independent of the previous ones.
pub trait Decoder: Send + Sync {
    fn decode(&self, pixels: &[u8], width: u32, height: u32)
        -> Result<Option<String>, DecodeError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Plain functions and closures work as decoders.
impl<F> Decoder for F
where
    F: Fn(&[u8], u32, u32) -> Result<Option<String>, DecodeError> + Send + Sync,
{
    fn decode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<String>, DecodeError> {
        self(pixels, width, height)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("pixel buffer is {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
    #[error("decoder failed: {0}")]
    Failed(String),
}
