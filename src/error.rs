use thiserror::Error;

/// Errors that terminate a decode session.
///
/// `NeedMoreInput` and end-of-stream are not modelled here: they are
/// non-fatal and flow through [`crate::decoder::DecodeStatus`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed bytestream: bad magic, an out-of-range header field, an
    /// inconsistent transform parameter, or a MANIAC descent that landed
    /// outside its declared bounds.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// A feature the bytestream asks for is recognised but not
    /// implemented by this decoder (reserved transform tag, custom
    /// bitchance mode, bit depth above 16).
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A buffer allocation failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

/// A specialised `Result` type for decoding operations.
pub type Result<T> = ::std::result::Result<T, Error>;
