pub mod feedback;
pub mod state;

pub use feedback::{FeedbackSink, LogFeedback};
pub use state::{ScanSession, SessionError, StatusUpdate};
