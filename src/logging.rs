//! Library-side diagnostics use the `log` facade throughout; this module
//! offers a one-line `env_logger` initializer behind the `logging-init`
//! feature for callers who just want sensible stderr output (the library
//! itself never initializes a logger implicitly).

/// Initializes `env_logger` with its default filter, reading `RUST_LOG` as
/// usual. A convenience for binaries embedding this client; libraries that
/// already configure `log` should not call this.
#[cfg(feature = "logging-init")]
pub fn init_default_logger() {
    let _ = env_logger::try_init();
}
