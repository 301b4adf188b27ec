//! The low-level correctional-stream client for one logical connection.
//! Generic over `Transport` so the receive loop and control-send methods can
//! be driven against either a real TCP/TLS socket or the in-memory
//! `MockTransport` used in tests — Transport is the only point of runtime
//! variation, served by a narrow trait rather than virtual dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use polaris_codec::{encode, ControlMessage};

use crate::error::{SessionError, TransportError};
use crate::transport::{Transport, TcpTransport};

/// Receive buffer sized so a single read can typically carry a full RTCM
/// message. Not a framing contract, purely a convenience.
pub const RECV_BUFFER_SIZE: usize = 1029;

/// Lifecycle of one logical connection, from open to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Draining,
}

/// Outcome of [`Session::run`].
#[derive(Debug)]
pub enum RunOutcome {
    /// `disconnect()` was called locally.
    Disconnected,
    /// The remote peer closed the connection in an orderly way.
    ConnectionClosed,
    /// A single read exceeded the configured timeout without any bytes.
    TimedOut,
    /// A read failed for any other reason (e.g. a reset connection).
    SocketError,
}

/// The sink invoked, strictly sequentially and only from the thread running
/// `run`, with each chunk of opaque corrections bytes.
pub type CorrectionsSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Shared<T> {
    transport: T,
    state: ConnectionState,
}

/// The low-level client for one logical connection, from open to close.
///
/// At most one `run` may be in flight at a time; control-send methods may be
/// invoked concurrently with `run` and are serialised internally.
pub struct Session<T: Transport = TcpTransport> {
    inner: Mutex<Shared<T>>,
    auth_token: Mutex<String>,
    sink: Mutex<Option<CorrectionsSink>>,
    close_requested: AtomicBool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Mutex::new(Shared {
                transport,
                state: ConnectionState::Closed,
            }),
            auth_token: Mutex::new(String::new()),
            sink: Mutex::new(None),
            close_requested: AtomicBool::new(false),
        }
    }

    /// Updates the token used on the next `connect_to`. No effect on an
    /// already-open session.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.lock() = token.into();
    }

    /// Installs the sink invoked from the receive loop with each chunk of
    /// opaque corrections bytes.
    pub fn set_rtcm_callback(&self, callback: CorrectionsSink) {
        *self.sink.lock() = Some(callback);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Opens the transport, sends the `Auth` frame, and transitions to
    /// `Open`. The service closes the socket with no bytes if the token is
    /// missing or invalid, surfaced here as `AuthRejected`.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<(), SessionError> {
        self.close_requested.store(false, Ordering::SeqCst);

        let mut guard = self.inner.lock();
        guard.state = ConnectionState::Connecting;
        guard.transport.connect(host, port)?;

        let token = self.auth_token.lock().clone();
        let mut frame = BytesMut::new();
        encode(&ControlMessage::Auth(token.as_bytes()), &mut frame)?;

        if let Err(err) = guard.transport.write(&frame) {
            guard.state = ConnectionState::Closed;
            return Err(match err {
                TransportError::Closed => SessionError::AuthRejected,
                other => SessionError::Send(other),
            });
        }

        guard.state = ConnectionState::Open;
        Ok(())
    }

    fn send_message(&self, message: &ControlMessage<'_>) -> Result<(), SessionError> {
        let mut guard = self.inner.lock();
        if guard.state != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }

        let mut frame = BytesMut::new();
        let report = encode(message, &mut frame)?;
        if report.saturated {
            log::warn!("quantised position exceeded the signed 32-bit range and was clamped");
        }
        guard
            .transport
            .write(&frame)
            .map_err(SessionError::Send)?;
        Ok(())
    }

    pub fn send_ecef(&self, x_m: f64, y_m: f64, z_m: f64) -> Result<(), SessionError> {
        self.send_message(&ControlMessage::EcefPosition { x_m, y_m, z_m })
    }

    pub fn send_lla(&self, lat_deg: f64, lon_deg: f64, alt_m: f64) -> Result<(), SessionError> {
        self.send_message(&ControlMessage::LlaPosition {
            lat_deg,
            lon_deg,
            alt_m,
        })
    }

    pub fn request_beacon(&self, id: &str) -> Result<(), SessionError> {
        self.send_message(&ControlMessage::Beacon(id.as_bytes()))
    }

    /// Blocking receive loop. Reads into a `RECV_BUFFER_SIZE` buffer and
    /// invokes the sink with each chunk, until `disconnect`, an orderly
    /// remote close, a read timeout, or another transport failure.
    ///
    /// The lock guarding the transport is only held for one `POLL_SLICE` at a
    /// time rather than the whole `timeout`: `disconnect()` takes the same
    /// lock to call `Transport::close`, and a single read held for the full
    /// configured timeout (up to 15s by default) would starve it, delaying
    /// how quickly a concurrent disconnect can take effect.
    pub fn run(&self, timeout: Duration) -> RunOutcome {
        const POLL_SLICE: Duration = Duration::from_millis(200);

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut waited = Duration::ZERO;

        loop {
            if self.close_requested.load(Ordering::SeqCst) {
                self.finish(ConnectionState::Closed);
                return RunOutcome::Disconnected;
            }

            let slice = POLL_SLICE.min(timeout.saturating_sub(waited));
            let read_result = {
                let mut guard = self.inner.lock();
                guard.transport.read(&mut buf, slice)
            };

            match read_result {
                Ok(0) => {
                    self.finish(ConnectionState::Closed);
                    return RunOutcome::ConnectionClosed;
                }
                Ok(n) => {
                    waited = Duration::ZERO;
                    if let Some(sink) = self.sink.lock().as_ref() {
                        sink(&buf[..n]);
                    }
                }
                Err(TransportError::Timeout) => {
                    waited += slice;
                    if waited >= timeout {
                        self.finish(ConnectionState::Closed);
                        return RunOutcome::TimedOut;
                    }
                }
                Err(TransportError::Closed) => {
                    self.finish(ConnectionState::Closed);
                    return RunOutcome::Disconnected;
                }
                Err(_) => {
                    self.finish(ConnectionState::Closed);
                    return RunOutcome::SocketError;
                }
            }
        }
    }

    fn finish(&self, state: ConnectionState) {
        let mut guard = self.inner.lock();
        guard.state = state;
    }

    /// Idempotent; transitions to `Draining`, closes the transport (which
    /// unblocks `run`), and is safe to call from any thread.
    pub fn disconnect(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        let mut guard = self.inner.lock();
        if guard.state == ConnectionState::Closed {
            return;
        }
        guard.state = ConnectionState::Draining;
        guard.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn connect_session() -> (Session<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        let session = Session::new(transport.clone());
        session.set_auth_token("T");
        session.connect_to("mock", 0).unwrap();
        transport.take_sent();
        (session, transport)
    }

    #[test]
    fn connect_sends_auth_frame_first() {
        let transport = MockTransport::new();
        let session = Session::new(transport.clone());
        session.set_auth_token("my-token");
        session.connect_to("mock", 0).unwrap();

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert!(polaris_codec::verify_checksum(&sent[0]));
        assert_eq!(sent[0][3], polaris_codec::MESSAGE_ID_AUTH);
        assert_eq!(&sent[0][6..sent[0].len() - 2], b"my-token");
    }

    #[test]
    fn run_delivers_inbound_bytes_to_the_sink() {
        let (session, transport) = connect_session();

        let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        session.set_rtcm_callback(Arc::new(move |chunk| {
            received_clone.lock().extend_from_slice(chunk);
        }));

        let payload: Vec<u8> = (0u8..42).collect();
        transport.push_inbound(&payload);

        let handle = thread::spawn(move || session.run(Duration::from_secs(5)));
        // Give the receive loop a moment to consume the queued bytes, then
        // disconnect so `run` returns.
        thread::sleep(Duration::from_millis(50));
        transport.remote_close();

        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, RunOutcome::ConnectionClosed));
        assert_eq!(*received.lock(), payload);
    }

    #[test]
    fn run_times_out_when_no_bytes_arrive() {
        let (session, _transport) = connect_session();
        let outcome = session.run(Duration::from_millis(50));
        assert!(matches!(outcome, RunOutcome::TimedOut));
    }

    #[test]
    fn run_reports_a_genuine_read_failure_distinctly_from_a_clean_close() {
        let (session, transport) = connect_session();
        transport.fail_next_read();
        let outcome = session.run(Duration::from_secs(5));
        assert!(matches!(outcome, RunOutcome::SocketError));
    }

    #[test]
    fn disconnect_from_another_thread_unblocks_run() {
        let (session, _transport) = connect_session();
        let session = Arc::new(session);
        let runner = {
            let session = session.clone();
            thread::spawn(move || session.run(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        session.disconnect();

        let outcome = runner.join().unwrap();
        assert!(matches!(outcome, RunOutcome::Disconnected));
    }

    #[test]
    fn saturated_ecef_position_is_clamped_but_still_transmitted() {
        let (session, transport) = connect_session();
        session.send_ecef(1e30, -1e30, 0.0).unwrap();

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        let x = i32::from_le_bytes(sent[0][6..10].try_into().unwrap());
        let y = i32::from_le_bytes(sent[0][10..14].try_into().unwrap());
        assert_eq!(x, i32::MAX);
        assert_eq!(y, i32::MIN);
    }

    #[test]
    fn send_before_connect_is_not_connected() {
        let transport = MockTransport::new();
        let session = Session::new(transport);
        let err = session.send_lla(1.0, 2.0, 3.0).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }

    #[test]
    fn beacon_id_over_cap_reports_not_enough_space() {
        let (session, _transport) = connect_session();
        let id = "x".repeat(polaris_codec::MAX_BEACON_ID_SIZE + 1);
        let err = session.request_beacon(&id).unwrap_err();
        assert!(matches!(err, SessionError::Codec(polaris_codec::Error::NotEnoughSpace)));
    }

    #[test]
    fn sink_is_invoked_sequentially_across_chunks() {
        let (session, transport) = connect_session();
        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let order_clone = order.clone();
        let counter_clone = counter.clone();
        session.set_rtcm_callback(Arc::new(move |_chunk| {
            order_clone
                .lock()
                .push(counter_clone.fetch_add(1, Ordering::SeqCst));
        }));

        transport.push_inbound(b"a");
        transport.push_inbound(b"b");
        transport.push_inbound(b"c");

        let handle = thread::spawn(move || session.run(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        transport.remote_close();
        handle.join().unwrap();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
