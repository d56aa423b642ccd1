//! error type for the als codec

use thiserror::Error;

/// Errors surfaced by the encoder, decoder, and file layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Sample format / rate / channel layout the encoder cannot take.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Configuration rejected at init.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The per-frame output budget was exhausted while writing.
    #[error("bitstream buffer overflow")]
    BitstreamOverflow,

    /// Malformed stream fed to the decoder or reader.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Input did not match the negotiated frame geometry.
    #[error("bad input length: {0}")]
    BadInputLength(String),
}

/// result type for als stuff
pub type Result<T> = std::result::Result<T, Error>;
