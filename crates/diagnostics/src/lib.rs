// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging for the sheetql crates
//!
//! All crates log through the macros below so the emitter is configured in
//! exactly one place.
//!
//! Usage:
//! - Set SHEETQL_LOG=off (default) - no logs
//! - Set SHEETQL_LOG=info - request outcomes, cache activity summaries
//! - Set SHEETQL_LOG=debug - per-stage pipeline detail, rewritten SQL

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable holding the minimum log level
pub const LOG_ENV: &str = "SHEETQL_LOG";

static INIT: Once = Once::new();

/// Parse a `SHEETQL_LOG` value.
///
/// `Ok(None)` means logging is switched off, `Err` carries the unrecognized
/// value so the caller can fall back.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "debug" => Ok(Some(emit::Level::Debug)),
        "info" => Ok(Some(emit::Level::Info)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "error" => Ok(Some(emit::Level::Error)),
        other => Err(other.to_string()),
    }
}

/// Initialize diagnostics from the SHEETQL_LOG environment variable
///
/// Call once at startup. Later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());

        let (level, unknown) = match parse_level(&raw) {
            Ok(None) => return,
            Ok(Some(level)) => (level, None),
            Err(other) => (emit::Level::Info, Some(other)),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if let Some(value) = unknown {
            let var = LOG_ENV;
            emit::warn!("unknown {var} value {value}, using info");
        }

        // emit_term writes synchronously, so nothing is buffered in the runtime
        std::mem::forget(rt);
    });
}

/// Request outcomes and other events a user running the CLI wants to see.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Per-stage pipeline detail: row counts, rewritten SQL, cache keys.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable problems: cache bypass, teardown failures.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
        init();
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("off"), Ok(None));
        assert_eq!(parse_level(""), Ok(None));
        assert_eq!(parse_level("DEBUG"), Ok(Some(emit::Level::Debug)));
        assert_eq!(parse_level(" warn "), Ok(Some(emit::Level::Warn)));
        assert_eq!(parse_level("verbose"), Err("verbose".to_string()));
    }

    #[test]
    fn test_macros_compile() {
        let rows = 42;
        info!("Test message");
        debug!("Debug message with {rows}", rows: rows);
        debug!("Debug message with {value}", value: 7);
        warn!("Warning message");
        error!("Error message");
    }
}
