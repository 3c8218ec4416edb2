//! Transports that expose the enrollment service.
//!
//! - [`http`] - axum router, endpoint logging and status mapping
//! - [`gateway`] - one serverless gateway event from stdin to stdout
//! - [`launcher`] - runs one of the two and races it against signals

pub mod gateway;
pub mod http;
pub mod launcher;

use std::io;

use thiserror::Error;

/// Errors that end a transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("http server failed: {0}")]
    Serve(#[source] io::Error),

    #[error("gateway I/O failed: {0}")]
    GatewayIo(#[source] io::Error),

    #[error("malformed gateway event: {0}")]
    GatewayDecode(#[from] serde_json::Error),

    #[error("invalid gateway request: {0}")]
    GatewayRequest(String),
}
