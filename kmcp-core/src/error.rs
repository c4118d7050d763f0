use std::path::PathBuf;
use thiserror::Error;

/// The error taxonomy shared by the build, search and profile engines.
///
/// Every fallible entry point in this crate returns `Result<_, KmcpError>` so
/// that the CLI binaries can log one descriptive line and exit non-zero.
#[derive(Debug, Error)]
pub enum KmcpError {
    /// A reference artifact or block file failed to parse or violated an
    /// invariant (non-ascending hashes, truncated body, bad magic, ...).
    #[error("corrupt input in {path}: {reason}")]
    CorruptInput { path: PathBuf, reason: String },

    /// Two things that must agree on (k, canonical, hashed) did not: a
    /// block's own columns, or a query against a block.
    #[error("header mismatch: {0}")]
    HeaderMismatch(String),

    /// A configuration value was out of range or combined illegally with
    /// another (e.g. `block_size > buckets`, `fpr` outside `(0,1)`).
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// Opening, reading, or memory-mapping a file failed.
    #[error("io fault on {path}: {source}")]
    IoFault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The profiler's input was not grouped by query as required.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A cooperative cancellation signal was observed.
    #[error("cancelled")]
    Cancelled,
}

impl KmcpError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KmcpError::IoFault {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        KmcpError::CorruptInput {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KmcpError>;
