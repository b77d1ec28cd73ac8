use crate::vita49::FramingError;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Socket level failure connecting, sending or receiving. The failed connection is dropped
    /// and re-established by the next operation that needs it.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A control request could not be encoded or its response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A control response decoded as JSON but did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The daemon answered a command with a `false` status.
    #[error("command rejected by daemon: {command}")]
    Rejected { command: String },

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Invalid caller supplied parameter or an operation not valid in the current state.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
