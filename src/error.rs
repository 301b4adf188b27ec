//! Error kinds for every layer of the client, each realised as its own
//! `thiserror` enum so lower layers can wrap `std::io::Error`,
//! `reqwest::Error`, etc. without collapsing everything into one flat type.

use thiserror::Error;

/// Errors from the `Transport` layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to resolve or connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("write failed: {0}")]
    Send(#[source] std::io::Error),
    #[error("read timed out")]
    Timeout,
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("transport was closed")]
    Closed,
    #[error("TLS error: {0}")]
    Tls(#[source] rustls::Error),
}

/// Errors from the `Authenticator`. `AuthError` is retryable; `Forbidden` is
/// fatal.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credentials rejected (HTTP {0})")]
    Forbidden(u16),
    #[error("authentication request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authentication response did not contain an access token")]
    MissingToken,
    #[error("authentication endpoint returned HTTP {0}")]
    UnexpectedStatus(u16),
}

/// Errors from `Session` operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Socket(#[from] TransportError),
    #[error("send failed: {0}")]
    Send(#[source] TransportError),
    #[error("service closed the connection after authentication")]
    AuthRejected,
    #[error("encoding failed: {0}")]
    Codec(#[from] polaris_codec::Error),
    #[error("connection closed by the remote peer")]
    ConnectionClosed,
    #[error("no bytes received within the read timeout")]
    TimedOut,
}
