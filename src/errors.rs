//! Error taxonomy for transfers.
//!
//! Caller errors (`InvalidAddress`, `InvalidRate`) are raised before any I/O
//! happens. Everything raised after a transfer starts names both ends of the
//! transfer so the message is actionable on its own.

use crate::services::store::StoreError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The locator did not match `scheme://container/key`.
    #[error("bad object address: {0}")]
    InvalidAddress(String),

    /// The rate limit could not be understood.
    #[error("cannot understand rate \"{0}\"")]
    InvalidRate(String),

    /// The content hash after the transfer did not match what was expected.
    /// Destination data must be treated as suspect.
    #[error("integrity check failed for {src} -> {dest}: expected {expected}, got {actual}")]
    Integrity {
        src: String,
        dest: String,
        expected: String,
        actual: String,
    },

    /// A pipeline stage (read, throttle, write, network body) failed.
    #[error("transfer of {src} -> {dest} failed: {cause}")]
    Io {
        src: String,
        dest: String,
        #[source]
        cause: io::Error,
    },

    /// Passthrough of whatever the remote store reported.
    #[error(transparent)]
    Remote(#[from] StoreError),
}

pub type TransferResult<T> = Result<T, TransferError>;

impl TransferError {
    /// Shortcut for wrapping a stage failure with both transfer ends.
    pub fn io(src: impl Into<String>, dest: impl Into<String>, cause: io::Error) -> Self {
        Self::Io {
            src: src.into(),
            dest: dest.into(),
            cause,
        }
    }

    /// True when destination data should not be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn io_error_keeps_original_cause() {
        let err = TransferError::io(
            "a.txt",
            "s3://bucket/a.txt",
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        let msg = err.to_string();
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("s3://bucket/a.txt"));

        let cause = err.source().expect("cause attached");
        assert_eq!(cause.to_string(), "pipe closed");
    }

    #[test]
    fn integrity_message_names_both_digests() {
        let err = TransferError::Integrity {
            src: "s3://b/k".into(),
            dest: "/tmp/k".into(),
            expected: "aaa".into(),
            actual: "bbb".into(),
        };
        assert!(err.is_integrity());
        let msg = err.to_string();
        assert!(msg.contains("aaa") && msg.contains("bbb"));
    }
}
