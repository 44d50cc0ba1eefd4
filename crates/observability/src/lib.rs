//! Shared logging setup.

pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .map(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    logging::init(format);
}
