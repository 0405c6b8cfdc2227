//! Process-wide tracing setup shared by slotkeeper binaries.

pub mod subscriber;

pub use subscriber::{LogFormat, LogSettings};

/// Initialize tracing from the environment (`RUST_LOG`, `SLOTKEEPER_LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init(&LogSettings::from_env());
}
