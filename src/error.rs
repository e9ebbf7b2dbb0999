//! Error types and the stream diagnostic sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

/// Main error type for sumreplay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad construction-time configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error opening or reading the dump source
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that prevent the engine from being constructed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Sampling probability outside [0, 1]
    #[error("SAMPLE probability {value} out of range [0, 1]")]
    SampleOutOfRange { value: f64 },

    /// Malformed default field list
    #[error("bad CONTENTS: {reason}")]
    BadContents { reason: String },

    /// Malformed default flow ID specification
    #[error("bad FLOWID: {reason}")]
    BadFlowId { reason: String },
}

/// Errors related to the dump source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Dump file not found or unreadable
    #[error("{path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    /// Read failure mid-stream
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Sink for stream-level diagnostics.
///
/// The record source and assembler never fail the stream for a bad
/// record; they report through this callback and recover locally. The
/// `landmark` identifies the offending position (`file:LINE` in text
/// mode, `file:record N` in binary mode).
pub trait ErrorSink {
    fn error(&self, landmark: &str, message: &str);
    fn warning(&self, landmark: &str, message: &str);
}

/// Default sink: routes diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn error(&self, landmark: &str, message: &str) {
        tracing::error!("{landmark}: {message}");
    }

    fn warning(&self, landmark: &str, message: &str) {
        tracing::warn!("{landmark}: {message}");
    }
}

/// Counting sink for tests: tallies diagnostics and remembers the last
/// error message.
#[derive(Debug, Default)]
pub struct CountingSink {
    errors: AtomicUsize,
    warnings: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl CountingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}

impl ErrorSink for CountingSink {
    fn error(&self, landmark: &str, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = Some(format!("{landmark}: {message}"));
    }

    fn warning(&self, _landmark: &str, _message: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_sink() {
        let sink = CountingSink::new();
        sink.error("dump:3", "packet parse error");
        sink.warning("dump:4", "unknown content type 'x'");
        sink.warning("dump:5", "bad !flowid specification");

        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 2);
        assert_eq!(
            sink.last_error().as_deref(),
            Some("dump:3: packet parse error")
        );
    }
}
