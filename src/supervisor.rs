//! The caller-visible client. Wraps an `Authenticator` and a `Session`,
//! implements the reconnect state machine, the retry counter, sticky-request
//! replay, and the control surface.
//!
//! All mutable state lives behind one `parking_lot::ReentrantMutex`-guarded
//! `RefCell`. `Session::run` is always invoked with this lock released, so
//! `send_*`/`disconnect` calls from other threads are never blocked on an
//! in-flight receive loop.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::ReentrantMutex;

use crate::auth::Authenticator;
use crate::config::PolarisConfig;
use crate::session::{CorrectionsSink, RunOutcome, Session};
use crate::transport::{TcpTransport, Transport};

/// Default corrections-stream endpoint.
pub const DEFAULT_ENDPOINT_HOST: &str = "polaris.pointonenav.com";
pub const DEFAULT_ENDPOINT_PORT: u16 = 8088;

/// API key + unique client id. Mutually exclusive with a directly-supplied
/// token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub unique_id: String,
}

/// The most recently expressed caller intent. At most one is held at a time;
/// setting a new one replaces the previous, and it is replayed immediately
/// after each successful (re)connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StickyRequest {
    None,
    Ecef { x_m: f64, y_m: f64, z_m: f64 },
    Lla { lat_deg: f64, lon_deg: f64, alt_m: f64 },
    Beacon(String),
}

/// The supervisor's own lifecycle state, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Authenticating,
    Connected,
    Reconnecting,
    Stopped,
}

struct Inner {
    credentials: Option<Credentials>,
    token: Option<String>,
    endpoint_host: String,
    endpoint_port: u16,
    max_reconnect_attempts: i32,
    sticky: StickyRequest,
    running: bool,
    connect_count: u32,
    state: SupervisorState,
    worker: Option<JoinHandle<()>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            credentials: None,
            token: None,
            endpoint_host: DEFAULT_ENDPOINT_HOST.to_string(),
            endpoint_port: DEFAULT_ENDPOINT_PORT,
            max_reconnect_attempts: 0,
            sticky: StickyRequest::None,
            running: false,
            connect_count: 0,
            state: SupervisorState::Idle,
            worker: None,
        }
    }
}

/// The high-level client: owns the `Session`, the sticky request, the
/// credentials or pre-supplied token, the endpoint, and the retry budget.
pub struct Supervisor<T: Transport = TcpTransport> {
    session: Session<T>,
    authenticator: Authenticator,
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl Supervisor<TcpTransport> {
    pub fn new() -> Self {
        Self::with_transport(TcpTransport::default())
    }
}

impl Default for Supervisor<TcpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Supervisor<T> {
    pub fn with_transport(transport: T) -> Self {
        Self::with_transport_and_auth_url(transport, crate::auth::DEFAULT_AUTH_URL.to_string())
    }

    /// As [`Supervisor::with_transport`], but overriding the authentication
    /// endpoint URL.
    pub fn with_transport_and_auth_url(transport: T, auth_url: String) -> Self {
        Self {
            session: Session::new(transport),
            authenticator: Authenticator::new(auth_url),
            inner: ReentrantMutex::new(RefCell::new(Inner::default())),
        }
    }

    /// Builds a `Supervisor` from a `PolarisConfig`, applying its endpoint,
    /// retry-budget, and credentials/token fields. `PolarisConfig` is an
    /// optional loader; the setters below remain the primary control
    /// surface.
    pub fn from_config(config: &PolarisConfig, transport: T) -> Self {
        let supervisor =
            Self::with_transport_and_auth_url(transport, config.auth_url.clone());

        {
            let inner = supervisor.inner.lock();
            let mut state = inner.borrow_mut();
            state.endpoint_host = config.endpoint_host.clone();
            state.endpoint_port = config.endpoint_port;
            state.max_reconnect_attempts = config.max_reconnect_attempts;
        }

        if let Some(token) = &config.credentials.auth_token {
            supervisor.set_auth_token(token.clone());
        } else if let (Some(api_key), Some(unique_id)) = (
            &config.credentials.api_key,
            &config.credentials.unique_id,
        ) {
            supervisor.set_api_key(api_key.clone(), unique_id.clone());
        }

        supervisor
    }

    /// Replaces credentials, invalidating any stored token.
    pub fn set_api_key(&self, api_key: impl Into<String>, unique_id: impl Into<String>) {
        let inner = self.inner.lock();
        let mut state = inner.borrow_mut();
        state.credentials = Some(Credentials {
            api_key: api_key.into(),
            unique_id: unique_id.into(),
        });
        state.token = None;
        if state.state == SupervisorState::Stopped {
            state.state = SupervisorState::Idle;
        }
    }

    /// Supplies an externally-obtained token; disables the Authenticator
    /// path and clears any stored credentials.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        let token = token.into();
        {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            state.credentials = None;
            state.token = Some(token.clone());
            if state.state == SupervisorState::Stopped {
                state.state = SupervisorState::Idle;
            }
        }
        self.session.set_auth_token(token);
    }

    /// Overrides the default corrections-stream endpoint.
    pub fn set_endpoint(&self, host: impl Into<String>, port: u16) {
        let inner = self.inner.lock();
        let mut state = inner.borrow_mut();
        state.endpoint_host = host.into();
        state.endpoint_port = port;
    }

    /// Consecutive failures before the token is cleared; `<= 0` means
    /// unlimited.
    pub fn set_max_reconnect_attempts(&self, max: i32) {
        let inner = self.inner.lock();
        inner.borrow_mut().max_reconnect_attempts = max;
    }

    /// Installs the sink invoked from the worker thread with each chunk of
    /// opaque corrections bytes.
    pub fn set_rtcm_callback(&self, callback: CorrectionsSink) {
        self.session.set_rtcm_callback(callback);
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.lock().borrow().state
    }

    fn set_state(&self, state: SupervisorState) {
        self.inner.lock().borrow_mut().state = state;
    }

    /// Updates the sticky request and, if currently connected, forwards it
    /// immediately; otherwise it is replayed on the next successful
    /// connect. Best-effort: never returns an error to the caller.
    pub fn send_ecef_position(&self, x_m: f64, y_m: f64, z_m: f64) {
        let connected = {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            state.sticky = StickyRequest::Ecef { x_m, y_m, z_m };
            state.state == SupervisorState::Connected
        };

        if connected {
            if let Err(err) = self.session.send_ecef(x_m, y_m, z_m) {
                log::warn!("failed to send ECEF position: {err}");
            }
        }
    }

    pub fn send_lla_position(&self, lat_deg: f64, lon_deg: f64, alt_m: f64) {
        let connected = {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            state.sticky = StickyRequest::Lla {
                lat_deg,
                lon_deg,
                alt_m,
            };
            state.state == SupervisorState::Connected
        };

        if connected {
            if let Err(err) = self.session.send_lla(lat_deg, lon_deg, alt_m) {
                log::warn!("failed to send LLA position: {err}");
            }
        }
    }

    pub fn request_beacon(&self, id: impl Into<String>) {
        let id = id.into();
        let connected = {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            state.sticky = StickyRequest::Beacon(id.clone());
            state.state == SupervisorState::Connected
        };

        if connected {
            if let Err(err) = self.session.request_beacon(&id) {
                log::warn!("failed to request beacon: {err}");
            }
        }
    }

    /// Always bumps the retry counter; clears the token and resets the
    /// counter only when credentials are present, the budget is finite, and
    /// the budget has just been exceeded.
    fn increment_retry(&self) {
        let inner = self.inner.lock();
        let mut state = inner.borrow_mut();
        state.connect_count += 1;

        if state.credentials.is_some()
            && state.max_reconnect_attempts > 0
            && state.connect_count > state.max_reconnect_attempts as u32
        {
            log::warn!("max reconnects exceeded, clearing access token and re-authenticating");
            state.token = None;
            state.connect_count = 0;
        }
    }

    fn replay_sticky(&self) -> Result<(), crate::error::SessionError> {
        let sticky = self.inner.lock().borrow().sticky.clone();
        match sticky {
            StickyRequest::None => Ok(()),
            StickyRequest::Ecef { x_m, y_m, z_m } => self.session.send_ecef(x_m, y_m, z_m),
            StickyRequest::Lla {
                lat_deg,
                lon_deg,
                alt_m,
            } => self.session.send_lla(lat_deg, lon_deg, alt_m),
            StickyRequest::Beacon(id) => self.session.request_beacon(&id),
        }
    }

    /// Runs the supervisor loop on the caller's thread. Blocks until
    /// `disconnect()` is called (from any thread) or the `Authenticator`
    /// reports `Forbidden`.
    ///
    /// Once `Forbidden` has stopped the loop, this returns immediately on
    /// every subsequent call — future control calls are no-ops until the
    /// caller provides new credentials or a new token via `set_api_key` or
    /// `set_auth_token`, which clears the stopped condition.
    pub fn run(&self, read_timeout: Duration) {
        {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            if state.state == SupervisorState::Stopped {
                return;
            }
            state.running = true;
            state.state = SupervisorState::Idle;
        }

        loop {
            if !self.inner.lock().borrow().running {
                break;
            }

            let needs_auth = {
                let inner = self.inner.lock();
                let state = inner.borrow();
                state.token.is_none() && state.credentials.is_some()
            };

            if needs_auth {
                self.set_state(SupervisorState::Authenticating);

                let (api_key, unique_id) = {
                    let inner = self.inner.lock();
                    let state = inner.borrow();
                    let creds = state.credentials.as_ref().expect("checked above");
                    (creds.api_key.clone(), creds.unique_id.clone())
                };

                match self.authenticator.authenticate(&api_key, &unique_id) {
                    Ok(token) => {
                        log::info!("authenticated with Polaris");
                        self.session.set_auth_token(token.clone());
                        self.inner.lock().borrow_mut().token = Some(token);
                    }
                    Err(crate::error::AuthError::Forbidden(code)) => {
                        log::error!("authentication rejected (HTTP {code}); is your API key valid?");
                        let inner = self.inner.lock();
                        let mut state = inner.borrow_mut();
                        state.running = false;
                        state.state = SupervisorState::Stopped;
                        break;
                    }
                    Err(err) => {
                        log::warn!("authentication failed, retrying: {err}");
                        continue;
                    }
                }
            }

            let (host, port) = {
                let inner = self.inner.lock();
                let state = inner.borrow();
                (state.endpoint_host.clone(), state.endpoint_port)
            };

            log::info!("connecting to Polaris at {host}:{port}");
            if let Err(err) = self.session.connect_to(&host, port) {
                log::warn!("error connecting to Polaris corrections stream, retrying: {err}");
                self.increment_retry();
                continue;
            }

            log::info!("connected to Polaris");
            self.set_state(SupervisorState::Connected);

            if let Err(err) = self.replay_sticky() {
                log::warn!("failed to resend sticky request, reconnecting: {err}");
                self.session.disconnect();
                self.increment_retry();
                continue;
            }

            match self.session.run(read_timeout) {
                RunOutcome::Disconnected => continue,
                RunOutcome::ConnectionClosed => {
                    log::info!("connection terminated remotely, reconnecting");
                    self.set_state(SupervisorState::Reconnecting);
                }
                RunOutcome::TimedOut => {
                    log::warn!("connection timed out, reconnecting");
                    self.set_state(SupervisorState::Reconnecting);
                    self.increment_retry();
                }
                RunOutcome::SocketError => {
                    log::warn!("connection failed, reconnecting");
                    self.set_state(SupervisorState::Reconnecting);
                    self.increment_retry();
                }
            }
        }

        let inner = self.inner.lock();
        let mut state = inner.borrow_mut();
        state.sticky = StickyRequest::None;
        state.connect_count = 0;
        if state.state != SupervisorState::Stopped {
            state.state = SupervisorState::Idle;
        }
    }

    /// Idempotent: stops the loop, closes the Session, and joins the worker
    /// thread spawned by `run_async`, if any.
    pub fn disconnect(&self) {
        let handle = {
            let inner = self.inner.lock();
            let mut state = inner.borrow_mut();
            state.running = false;
            state.worker.take()
        };

        self.session.disconnect();

        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<T: Transport + 'static> Supervisor<T> {
    /// Spawns a single worker thread running `run`.
    pub fn run_async(self: &Arc<Self>, read_timeout: Duration) {
        let this = self.clone();
        let handle = thread::spawn(move || this.run(read_timeout));
        let inner = self.inner.lock();
        inner.borrow_mut().worker = Some(handle);
    }
}
