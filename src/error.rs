// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for dispsync.
//!
//! Four kinds of failure exist, and each travels a different distance:
//!
//! - **Transient** (endpoint unreachable): recovered inside the transfer
//!   manager by resubmission. It never leaves [`crate::transfer`].
//! - [`TransferError`]: terminal for one transfer, reported through the
//!   completion path to the subsystem that asked for it.
//! - [`ParseError`]: a fetched document was not valid structured data.
//! - [`FatalCondition`]: the host cannot continue. The binary prints
//!   [`FatalCondition::user_message`] and exits.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Terminal failure of a single transfer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransferError {
    /// Remote could not be reached. Only surfaced by the blocking path,
    /// the asynchronous engine retries these silently.
    #[error("could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// Server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// DNS, TLS, malformed response, body read failure.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Local cache file could not be opened or written.
    #[error("cache file {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
}

impl TransferError {
    /// Whether the failure is "service not up yet" and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Unreachable { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Blocking fetches surface every failure, transient or not, under this name.
pub type NetworkError = TransferError;

/// A document could not be read or decoded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} must contain a JSON object at the top level", path.display())]
    NotAnObject { path: PathBuf },
}

/// Unrecoverable condition. The host flushes diagnostics and terminates.
#[derive(Debug, Error)]
pub enum FatalCondition {
    #[error("cache directory {} could not be created: {source}", path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("initial configuration is unusable: {0}")]
    InvalidInitialIndex(#[source] ParseError),

    #[error("transfer runtime could not be started: {0}")]
    Runtime(#[source] io::Error),

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

impl FatalCondition {
    /// Full message for the final user-visible notice before exit.
    pub fn user_message(&self) -> String {
        let title = self.to_string();
        match self {
            FatalCondition::CacheDir { .. } => format_error(
                &title,
                &["Working directory is read-only", "Cache path points at a file"],
                &["Run from a writable directory", "Pass --cache-dir <DIR>"],
            ),
            FatalCondition::InvalidInitialIndex(_) => format_error(
                &title,
                &["Server is publishing a malformed index document"],
                &["Validate the index JSON on the server", "Restart once it is fixed"],
            ),
            FatalCondition::Runtime(_) | FatalCondition::Client(_) => {
                format_error(&title, &["System resource exhaustion"], &[])
            }
        }
    }
}

/// Anything the sync engine can hand back to its host.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fatal(#[from] FatalCondition),
}

/// Formats an error message with title, causes, and fixes.
///
/// # Example
///
/// ```
/// use dispsync::error::format_error;
///
/// let msg = format_error("Cache unavailable", &["Disk full"], &["Free some space"]);
/// assert!(msg.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n", title));

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}

/// Short context string for logs: identifier plus cause.
pub(crate) struct Failure<'a> {
    pub identifier: &'a str,
    pub error: &'a TransferError,
}

impl fmt::Display for Failure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" - {}", self.identifier, self.error)
    }
}
