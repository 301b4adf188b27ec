//! Client session engine for the Polaris GNSS corrections-distribution
//! service.
//!
//! A device authenticates with an API key, opens a persistent TCP/TLS
//! session, reports its position (or requests a named reference station),
//! and continuously receives opaque RTCM correction bytes which it forwards
//! to a GNSS receiver. This crate implements the authentication handshake,
//! the small binary control-frame protocol, the receive path, and the
//! [`Supervisor`] that drives reconnect-with-backoff, re-authentication on
//! token expiry, and replay of the caller's last position/beacon intent
//! across dropped connections.
//!
//! Wire framing lives in the sibling [`polaris_codec`] crate, re-exported
//! here as [`codec`]. The rest of this crate is payload-opaque: inbound
//! RTCM bytes are handed to the caller's sink unparsed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use polaris::Supervisor;
//!
//! let supervisor = Supervisor::new();
//! supervisor.set_api_key("my-api-key", "my-unique-device-id");
//! supervisor.set_rtcm_callback(Arc::new(|rtcm: &[u8]| {
//!     // Forward `rtcm` to a connected GNSS receiver.
//!     let _ = rtcm;
//! }));
//! supervisor.send_lla_position(37.7749, -122.4194, 42.0);
//! supervisor.run(Duration::from_secs(15));
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use polaris_codec as codec;

pub use auth::Authenticator;
pub use config::PolarisConfig;
pub use session::{ConnectionState, CorrectionsSink, RunOutcome, Session};
pub use supervisor::{Credentials, StickyRequest, Supervisor, SupervisorState};
pub use transport::{TcpTransport, Transport, TransportMode};

#[cfg(any(test, feature = "testing"))]
pub use transport::MockTransport;
