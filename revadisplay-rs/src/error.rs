/* Domain-specific error variants for the streaming engine. Explicit
 * variants let the stream controller branch on recovery vs. caller-bug
 * failures instead of matching on opaque strings. */
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no compatible display device found")]
    NoCompatibleDevice,

    #[error("transport is not open")]
    TransportClosed,

    #[error("transport failure on {port}: {source}")]
    Transport {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("recovery failed after {attempts} attempt(s): {cause}")]
    RecoverFailed { attempts: u8, cause: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
