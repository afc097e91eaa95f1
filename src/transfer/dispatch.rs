// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Completion dispatch.
//!
//! Owns the bookkeeping for every outstanding request and turns a finished
//! transfer into exactly one [`Completion`]. The local file is written,
//! flushed and closed before the continuation is released.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::types::{FetchResponse, Fetched, RequestId, Resolved, TransferState};
use crate::error::TransferError;

/// A transfer that reached a terminal state.
#[derive(Debug)]
pub enum Completion<T> {
    Succeeded {
        id: RequestId,
        identifier: String,
        local_path: PathBuf,
        fetched: Fetched,
        continuation: Option<T>,
    },
    Failed {
        id: RequestId,
        identifier: String,
        error: TransferError,
    },
}

impl<T> Completion<T> {
    pub fn id(&self) -> RequestId {
        match self {
            Completion::Succeeded { id, .. } | Completion::Failed { id, .. } => *id,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Completion::Succeeded { identifier, .. } | Completion::Failed { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Succeeded { .. })
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Completion::Succeeded { local_path, .. } => Some(local_path),
            Completion::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TransferError> {
        match self {
            Completion::Failed { error, .. } => Some(error),
            Completion::Succeeded { .. } => None,
        }
    }
}

/// Bookkeeping for one outstanding request.
pub(crate) struct Tracked<T> {
    pub identifier: String,
    pub resolved: Resolved,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub continuation: Option<T>,
    /// `None` when the destination could not be opened; the failure is
    /// already queued for the next poll.
    pub file: Option<File>,
    pub state: TransferState,
    pub attempts: u32,
    /// Engine task for the current attempt. Replaced on every retry.
    pub task: Option<JoinHandle<()>>,
}

pub(crate) struct CompletionDispatcher<T> {
    tracked: HashMap<RequestId, Tracked<T>>,
}

impl<T> CompletionDispatcher<T> {
    pub fn new() -> Self {
        Self {
            tracked: HashMap::new(),
        }
    }

    pub fn track(&mut self, id: RequestId, entry: Tracked<T>) {
        self.tracked.insert(id, entry);
    }

    pub fn get(&self, id: RequestId) -> Option<&Tracked<T>> {
        self.tracked.get(&id)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Tracked<T>> {
        self.tracked.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_tracking_source(&self, source: &str) -> bool {
        self.tracked
            .values()
            .any(|entry| entry.resolved.source == source && entry.state.is_pending())
    }

    /// Retire `id` and build its completion.
    ///
    /// Returns `None` if `id` is unknown, which is what makes dispatch
    /// at-most-once: the entry is gone after the first call.
    pub fn finish(
        &mut self,
        id: RequestId,
        outcome: Result<FetchResponse, TransferError>,
    ) -> Option<Completion<T>> {
        let mut entry = self.tracked.remove(&id)?;
        // The task already ran to completion; dropping the handle detaches it.
        entry.task.take();

        let result = match outcome {
            Ok(FetchResponse::Body { bytes, .. }) => {
                let written = match entry.file.take() {
                    Some(file) => finalize(file, &bytes, &entry.resolved.local_path),
                    None => Err(TransferError::Io {
                        path: entry.resolved.local_path.clone(),
                        reason: "destination was never opened".to_string(),
                    }),
                };
                written.map(|()| Fetched::Updated { bytes: bytes.len() })
            }
            Ok(FetchResponse::NotModified) => Ok(Fetched::NotModified),
            Err(error) => Err(error),
        };
        // Closes the handle on the not-modified and error paths.
        drop(entry.file.take());

        Some(match result {
            Ok(fetched) => {
                entry.state = TransferState::Succeeded;
                Completion::Succeeded {
                    id,
                    identifier: entry.identifier,
                    local_path: entry.resolved.local_path,
                    fetched,
                    continuation: entry.continuation,
                }
            }
            Err(error) => {
                entry.state = TransferState::FailedPermanent;
                Completion::Failed {
                    id,
                    identifier: entry.identifier,
                    error,
                }
            }
        })
    }

    /// Remove everything, for shutdown.
    pub fn drain(&mut self) -> Vec<(RequestId, Tracked<T>)> {
        self.tracked.drain().collect()
    }
}

/// Replace the file's content with `bytes`, flush, close.
fn finalize(mut file: File, bytes: &[u8], path: &Path) -> Result<(), TransferError> {
    let io = |e| TransferError::io(path, e);
    file.set_len(0).map_err(io)?;
    file.seek(SeekFrom::Start(0)).map_err(io)?;
    file.write_all(bytes).map_err(io)?;
    file.flush().map_err(io)?;
    Ok(())
}
