//! Sampling, decode and match evaluation for a live camera feed.

pub mod decode;
pub mod sampler;
pub mod session;

pub use decode::{DecodeError, Decoder, QrDecoder};
pub use sampler::{FrameSampler, SamplerError};
pub use session::{FeedbackSink, LogFeedback, ScanSession, SessionError, StatusUpdate};
