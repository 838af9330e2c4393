// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-telemetry
//!
//! Structured logging setup. The engine itself only ever logs through the
//! `tracing` facade; embedders call [`init_tracing`] once at startup to
//! install a subscriber.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use tracing_subscriber::EnvFilter;

/// Output format for the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Plain,
    /// Newline-delimited JSON, for log shippers.
    Json,
}

/// Install a global `tracing` subscriber.
///
/// The filter honors `RUST_LOG` and falls back to `default_directive`
/// (e.g. `"msghub=info"`) when unset. Calling this twice is a no-op; the
/// second call returns `false`.
pub fn init_tracing(default_directive: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

/// Convenience wrapper: info-level default, plain output.
pub fn init_default() -> bool {
    init_tracing("msghub=info", LogFormat::Plain)
}
