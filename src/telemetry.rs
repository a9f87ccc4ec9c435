//! Tracing bootstrap.
//!
//! The core emits structured `tracing` events throughout; applications
//! that want console output call [`init`] once at startup. Libraries and
//! tests that install their own subscriber skip this entirely.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber honoring `RUST_LOG`.
///
/// Falls back to `info` for this crate when no filter is set. Calling it
/// twice is harmless; the second call is ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spiceflow=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
