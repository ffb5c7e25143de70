pub mod qr;
pub mod traits;

pub use qr::QrDecoder;
pub use traits::{DecodeError, Decoder};
