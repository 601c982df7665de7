//! Error types for talking to instruments.

use std::time::Duration;

use crate::endpoint::EndpointParseError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Anything that can go wrong between parsing an endpoint and reading a
/// reply. Parse errors are recoverable user input problems; everything else
/// ends the session and the controller must be reconstructed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] EndpointParseError),

    #[error("refusing to open structurally invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("cannot connect to {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open serial device {endpoint}: {source}")]
    Serial {
        endpoint: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("instrument closed the connection")]
    ConnectionClosed,

    #[error("i/o error talking to the instrument: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("malformed reply line {line:?}: {source}")]
    MalformedReply {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no reply from the instrument within {0:?}")]
    Timeout(Duration),

    #[error("discovery failed: {0}")]
    Discovery(String),
}
