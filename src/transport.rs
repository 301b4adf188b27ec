//! The `Transport` seam: the only point of runtime variation in the client.
//! `TcpTransport` is the real implementation (plain TCP or TLS 1.2+ via
//! `rustls`, platform trust store, no certificate pinning); `MockTransport`
//! is an in-memory duplex used by the `Session`/`Supervisor` test suites.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;

use crate::error::TransportError;

/// Fixed send timeout: short enough that a back-pressuring peer cannot block
/// a control-frame write indefinitely.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking connect/read/write/close contract used by `Session`.
///
/// A concurrent `close()` from another thread must unblock an in-progress
/// `read` so it returns `TransportError::Closed`.
pub trait Transport: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
    fn close(&mut self);
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Stream {
    fn get_ref(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => &s.sock,
        }
    }
}

/// Whether the corrections stream is carried over plain TCP or TLS 1.2+.
///
/// A network-facing deployment must use TLS; `Plain` is retained for
/// loopback/test endpoints only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    Plain,
    #[default]
    Tls,
}

/// The production `Transport`: a `std::net::TcpStream`, optionally wrapped
/// in a `rustls::StreamOwned` for TLS.
pub struct TcpTransport {
    mode: TransportMode,
    stream: Option<Stream>,
    closed: Arc<AtomicBool>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TransportMode::Tls)
    }
}

impl TcpTransport {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            stream: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tls_connect(&self, host: &str, tcp: TcpStream) -> Result<Stream, TransportError> {
        let mut root_store = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            // Skip certs the platform store hands us that rustls can't
            // parse rather than failing the whole connection over one bad
            // entry.
            let _ = root_store.add(cert);
        }

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::Tls(rustls::Error::General("invalid DNS name".into())))?;

        let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(TransportError::Tls)?;

        Ok(Stream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.closed.store(false, Ordering::SeqCst);

        let addr: SocketAddr = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                host: host.to_string(),
                port,
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::Connect {
                host: host.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            })?;

        let tcp = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        tcp.set_write_timeout(Some(SEND_TIMEOUT))
            .map_err(TransportError::Send)?;
        tcp.set_nodelay(true).map_err(TransportError::Send)?;

        self.stream = Some(match self.mode {
            TransportMode::Plain => Stream::Plain(tcp),
            TransportMode::Tls => self.tls_connect(host, tcp)?,
        });

        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut written = 0;
        while written < bytes.len() {
            let n = match stream {
                Stream::Plain(s) => s.write(&bytes[written..]),
                Stream::Tls(s) => s.write(&bytes[written..]),
            }
            .map_err(TransportError::Send)?;

            if n == 0 {
                return Err(TransportError::Send(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned 0 bytes",
                )));
            }
            written += n;
        }
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::Read)?;

        let result = match stream {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        };

        match result {
            Ok(n) => {
                if self.closed.load(Ordering::SeqCst) {
                    Err(TransportError::Closed)
                } else {
                    Ok(n)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                if self.closed.load(Ordering::SeqCst) {
                    Err(TransportError::Closed)
                } else {
                    Err(TransportError::Timeout)
                }
            }
            Err(e) => {
                if self.closed.load(Ordering::SeqCst) {
                    Err(TransportError::Closed)
                } else {
                    Err(TransportError::Read(e))
                }
            }
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            // Shutting down the read half unblocks a concurrent `read()`
            // blocked in the kernel past its configured timeout.
            let _ = stream.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    //! An in-memory duplex `Transport`, for `Session`/`Supervisor` tests.
    //! Inbound bytes are queued by the test harness via [`MockTransport::push_inbound`];
    //! outbound frames are captured via [`MockTransport::take_sent`].

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Condvar;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Shared {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        connected: bool,
        closed: bool,
        fail_connect: bool,
        /// Injects `ConnectionClosed` on the next read once `inbound` drains.
        remote_closed: bool,
        /// Makes the next `write()` fail as if the peer had closed the
        /// socket right after the `Auth` frame (an auth-rejected connect
        /// failure).
        fail_next_write: bool,
        always_fail_write: bool,
        /// Injects a genuine `TransportError::Read` (e.g. a reset
        /// connection) on the next `read()`, distinct from a timeout or an
        /// explicit `close()`.
        fail_next_read: bool,
    }

    /// A `Transport` fake with no real sockets: `read` is driven by bytes
    /// the test pushes in, `write` is captured for assertions.
    #[derive(Clone)]
    pub struct MockTransport {
        shared: Arc<(Mutex<Shared>, Condvar)>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                shared: Arc::new((Mutex::new(Shared::default()), Condvar::new())),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `connect()` fail with a `SocketError`-equivalent.
        pub fn fail_next_connect(&self) {
            self.shared.0.lock().unwrap().fail_connect = true;
        }

        /// Makes the next `write()` (i.e. the `Auth` frame on the next
        /// `connect_to`) fail as though the peer rejected the token.
        pub fn fail_next_write(&self) {
            self.shared.0.lock().unwrap().fail_next_write = true;
        }

        /// Toggles whether every subsequent `write()` fails, re-arming
        /// `fail_next_write` after each `connect()`. Models a service that
        /// rejects every token it is handed.
        pub fn set_always_fail_write(&self, always: bool) {
            self.shared.0.lock().unwrap().always_fail_write = always;
        }

        /// Queues one chunk to be returned, whole, by a single `read()`
        /// call (mirrors the "arbitrary chunk sizes, no framing" contract
        /// of the real corrections stream).
        pub fn push_inbound(&self, bytes: &[u8]) {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock().unwrap();
            shared.inbound.push_back(bytes.to_vec());
            cvar.notify_all();
        }

        /// Marks the connection as orderly-closed by the remote peer: once
        /// queued inbound bytes are drained, `read` returns `Ok(0)`.
        pub fn remote_close(&self) {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock().unwrap();
            shared.remote_closed = true;
            cvar.notify_all();
        }

        /// Makes the next `read()` fail as though the underlying socket hit
        /// a genuine I/O error (e.g. a reset connection), not a timeout or
        /// an explicit local/remote close.
        pub fn fail_next_read(&self) {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock().unwrap();
            shared.fail_next_read = true;
            cvar.notify_all();
        }

        /// Drains and returns every frame written since the last call.
        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.shared.0.lock().unwrap().sent)
        }

        pub fn is_closed(&self) -> bool {
            self.shared.0.lock().unwrap().closed
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self, _host: &str, _port: u16) -> Result<(), TransportError> {
            let mut shared = self.shared.0.lock().unwrap();
            if shared.fail_connect {
                shared.fail_connect = false;
                return Err(TransportError::Connect {
                    host: "mock".into(),
                    port: 0,
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "mock refused"),
                });
            }
            shared.connected = true;
            shared.closed = false;
            if shared.always_fail_write {
                shared.fail_next_write = true;
            }
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
            let mut shared = self.shared.0.lock().unwrap();
            if !shared.connected || shared.closed {
                return Err(TransportError::Closed);
            }
            if shared.fail_next_write {
                shared.fail_next_write = false;
                shared.closed = true;
                return Err(TransportError::Closed);
            }
            shared.sent.push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock().unwrap();
            loop {
                if shared.closed {
                    return Err(TransportError::Closed);
                }
                if shared.fail_next_read {
                    shared.fail_next_read = false;
                    return Err(TransportError::Read(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "mock read error",
                    )));
                }
                if let Some(chunk) = shared.inbound.pop_front() {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                if shared.remote_closed {
                    return Ok(0);
                }
                let (guard, timed_out) = cvar.wait_timeout(shared, timeout).unwrap();
                shared = guard;
                if timed_out.timed_out() {
                    if shared.closed {
                        return Err(TransportError::Closed);
                    }
                    return Err(TransportError::Timeout);
                }
            }
        }

        fn close(&mut self) {
            let (lock, cvar) = &*self.shared;
            let mut shared = lock.lock().unwrap();
            shared.closed = true;
            cvar.notify_all();
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use mock::MockTransport;
