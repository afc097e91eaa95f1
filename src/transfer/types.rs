// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer types for the multiplexed download engine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Locally generated identity of a request.
///
/// Assigned once at submission and kept across retries. Engine task handles
/// are replaced on each retry and are never used as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque token returned by `submit`. Results arrive through `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle {
    pub(crate) id: RequestId,
}

impl TransferHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Admitted, waiting for its task to be polled (or for a retry delay)
    Queued,
    /// Task has been polled at least once
    InFlight,
    /// Finished cleanly
    Succeeded,
    /// Remote unreachable, will be resubmitted
    FailedTransient,
    /// Finished with a reported error
    FailedPermanent,
}

impl TransferState {
    /// Returns true once the transfer will never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Succeeded | TransferState::FailedPermanent)
    }

    /// Returns true while `is_queued` should report the transfer.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransferState::Queued | TransferState::InFlight | TransferState::FailedTransient
        )
    }
}

/// A fetch the caller wants performed.
///
/// `T` is the continuation: a caller-chosen value handed back exactly once
/// when the transfer succeeds.
#[derive(Debug, Clone)]
pub struct TransferRequest<T> {
    /// Logical name, e.g. `/index.json` or a full URL
    pub identifier: String,
    /// Skip the body unless the remote copy is newer than this
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Handed back on success
    pub continuation: Option<T>,
}

impl<T> TransferRequest<T> {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            if_modified_since: None,
            continuation: None,
        }
    }

    pub fn then(mut self, continuation: T) -> Self {
        self.continuation = Some(continuation);
        self
    }

    pub fn if_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(since);
        self
    }
}

/// What the transport was asked to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSpec {
    pub url: String,
    pub if_modified_since: Option<DateTime<Utc>>,
}

/// What came back from a successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    Body {
        bytes: Vec<u8>,
        last_modified: Option<DateTime<Utc>>,
    },
    NotModified,
}

/// How a successful transfer left the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// Fresh content was written
    Updated { bytes: usize },
    /// Remote reported 304, local file untouched
    NotModified,
}

/// Resolved endpoints of one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: String,
    pub local_path: PathBuf,
}
