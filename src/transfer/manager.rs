// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer manager for cooperative, frame-driven downloading.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

use super::dispatch::{Completion, CompletionDispatcher, Tracked};
use super::resolver::PathResolver;
use super::transport::{HttpTransport, Transport};
use super::types::{
    FetchResponse, FetchSpec, RequestId, TransferHandle, TransferRequest, TransferState,
};
use crate::error::{FatalCondition, NetworkError, TransferError};

/// Default pause before resubmitting an unreachable transfer.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Messages from transfer tasks back to the polling thread.
#[derive(Debug)]
enum EngineEvent {
    /// The attempt left its retry delay and issued the request
    Started(RequestId),
    /// The attempt finished, one way or another
    Finished(RequestId, Result<FetchResponse, TransferError>),
}

/// Tunables for [`TransferManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Delay before an unreachable transfer is attempted again
    pub retry_delay: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Multiplexes transfers on a current-thread runtime that only advances
/// inside [`TransferManager::poll`].
///
/// `T` is the continuation type handed back with each successful
/// [`Completion`].
///
/// The manager must be used from a thread that is not already running an
/// async runtime.
pub struct TransferManager<T = ()> {
    resolver: PathResolver,
    transport: Arc<dyn Transport>,
    dispatcher: CompletionDispatcher<T>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    next_id: u64,
    retry_delay: Duration,
    runtime: Runtime,
}

impl<T> TransferManager<T> {
    /// Create a manager using HTTP for the given default server.
    ///
    /// Creates `cache_dir` if it does not exist.
    pub fn new(
        default_server: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, FatalCondition> {
        let transport = HttpTransport::with_defaults()?;
        Self::with_transport(
            PathResolver::new(default_server, cache_dir),
            Arc::new(transport),
            ManagerOptions::default(),
        )
    }

    /// Create a manager on top of any [`Transport`].
    pub fn with_transport(
        resolver: PathResolver,
        transport: Arc<dyn Transport>,
        options: ManagerOptions,
    ) -> Result<Self, FatalCondition> {
        fs::create_dir_all(resolver.cache_dir()).map_err(|source| FatalCondition::CacheDir {
            path: resolver.cache_dir().to_path_buf(),
            source,
        })?;

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(FatalCondition::Runtime)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            resolver,
            transport,
            dispatcher: CompletionDispatcher::new(),
            events_tx,
            events_rx,
            next_id: 0,
            retry_delay: options.retry_delay,
            runtime,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Number of requests not yet completed.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.len()
    }

    /// Current state of an outstanding request. `None` once it completed.
    pub fn state(&self, handle: TransferHandle) -> Option<TransferState> {
        self.dispatcher.get(handle.id).map(|entry| entry.state)
    }

    /// Admit a request. Never blocks.
    ///
    /// Opens the destination file right away. An unconditional request
    /// truncates it; a conditional one keeps the old content until a new
    /// body arrives. Failure to open is reported by the next `poll`.
    pub fn submit(&mut self, request: TransferRequest<T>) -> TransferHandle {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let resolved = self.resolver.resolve(&request.identifier);
        let opened = if request.if_modified_since.is_some() {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&resolved.local_path)
        } else {
            File::create(&resolved.local_path)
        };

        let (file, task) = match opened {
            Ok(file) => {
                let spec = FetchSpec {
                    url: resolved.source.clone(),
                    if_modified_since: request.if_modified_since,
                };
                (Some(file), Some(self.spawn_attempt(id, spec, Duration::ZERO)))
            }
            Err(err) => {
                let error = TransferError::io(&resolved.local_path, err);
                // Receiver lives in `self`, send cannot fail.
                let _ = self.events_tx.send(EngineEvent::Finished(id, Err(error)));
                (None, None)
            }
        };

        tracing::trace!(request = %id, source = %resolved.source, "Transfer submitted");

        self.dispatcher.track(
            id,
            Tracked {
                identifier: request.identifier,
                resolved,
                if_modified_since: request.if_modified_since,
                continuation: request.continuation,
                file,
                state: TransferState::Queued,
                attempts: 0,
                task,
            },
        );

        TransferHandle { id }
    }

    /// Submit a conditional request using the cached copy's modification
    /// time, or an unconditional one if nothing is cached yet.
    pub fn submit_if_newer(&mut self, identifier: &str, continuation: Option<T>) -> TransferHandle {
        let mut request = TransferRequest::new(identifier);
        request.continuation = continuation;
        if let Some(modified) = local_modified(&self.resolver.local_path(identifier)) {
            request = request.if_modified_since(modified);
        }
        self.submit(request)
    }

    /// Advance every transfer by one non-blocking step and collect the ones
    /// that finished.
    ///
    /// Unreachable transfers are resubmitted here and never reported.
    pub fn poll(&mut self) -> Vec<Completion<T>> {
        if self.dispatcher.is_empty() {
            // Leftovers from cancelled tasks, if any.
            while self.events_rx.try_recv().is_ok() {}
            return Vec::new();
        }

        // One scheduler pass: ready tasks run, I/O and timers are polled
        // with a zero timeout, then control comes straight back.
        self.runtime.block_on(tokio::task::yield_now());

        let mut completions = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                EngineEvent::Started(id) => {
                    if let Some(entry) = self.dispatcher.get_mut(id) {
                        entry.state = TransferState::InFlight;
                    }
                }
                EngineEvent::Finished(id, Err(error)) if error.is_transient() => {
                    self.retry(id, &error);
                }
                EngineEvent::Finished(id, outcome) => {
                    if let Some(completion) = self.dispatcher.finish(id, outcome) {
                        match &completion {
                            Completion::Succeeded { identifier, .. } => {
                                tracing::debug!("Successful download of file \"{}\"", identifier);
                            }
                            Completion::Failed { identifier, error, .. } => {
                                tracing::debug!("Transfer of \"{}\" failed: {}", identifier, error);
                            }
                        }
                        completions.push(completion);
                    }
                }
            }
        }

        completions
    }

    /// Download `identifier` before returning.
    ///
    /// Uses the transport's blocking path, so asynchronous transfers are
    /// neither advanced nor disturbed. Not for bulk use.
    pub fn fetch_now(&self, identifier: &str) -> Result<PathBuf, NetworkError> {
        let resolved = self.resolver.resolve(identifier);
        let spec = FetchSpec {
            url: resolved.source.clone(),
            if_modified_since: None,
        };

        match self.transport.fetch_blocking(&spec) {
            Ok(FetchResponse::Body { bytes, .. }) => {
                fs::write(&resolved.local_path, bytes)
                    .map_err(|e| TransferError::io(&resolved.local_path, e))?;
            }
            Ok(FetchResponse::NotModified) => {}
            Err(error) => {
                tracing::warn!("Error in getting file \"{}\" - {}", resolved.source, error);
                return Err(error);
            }
        }

        tracing::debug!("Successful file download of {}", resolved.source);
        Ok(resolved.local_path)
    }

    /// True while a transfer for the same source is queued, in flight, or
    /// waiting to be retried.
    pub fn is_queued(&self, identifier: &str) -> bool {
        let source = self.resolver.source_url(identifier);
        self.dispatcher.is_tracking_source(&source)
    }

    /// Remote modification time, without transferring the body.
    ///
    /// `None` when the server does not report one or cannot be reached.
    pub fn get_age(&self, identifier: &str) -> Option<DateTime<Utc>> {
        let source = self.resolver.source_url(identifier);
        match self.transport.last_modified(&source) {
            Ok(Some(age)) => Some(age),
            Ok(None) => {
                tracing::warn!("The server does not support file ages: {}", source);
                None
            }
            Err(error) => {
                tracing::debug!("File age probe failed for {}: {}", source, error);
                None
            }
        }
    }

    /// Abort every transfer and release its file. Returns how many were
    /// outstanding.
    pub fn cancel_all(&mut self) -> usize {
        let drained = self.dispatcher.drain();
        let count = drained.len();
        for (_, entry) in drained {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        while self.events_rx.try_recv().is_ok() {}

        if count > 0 {
            tracing::info!("Cancelled {} outstanding transfer(s)", count);
        }
        count
    }

    fn retry(&mut self, id: RequestId, error: &TransferError) {
        let Some(entry) = self.dispatcher.get_mut(id) else {
            return;
        };
        entry.state = TransferState::FailedTransient;
        entry.attempts += 1;

        // Expected while the server is still starting: keep it out of the
        // regular log.
        if entry.attempts == 1 {
            tracing::debug!("\"{}\" unreachable, retrying: {}", entry.identifier, error);
        } else {
            tracing::trace!(attempt = entry.attempts, "\"{}\" still unreachable", entry.identifier);
        }

        let spec = FetchSpec {
            url: entry.resolved.source.clone(),
            if_modified_since: entry.if_modified_since,
        };
        let delay = self.retry_delay;
        let task = self.spawn_attempt(id, spec, delay);

        if let Some(entry) = self.dispatcher.get_mut(id) {
            entry.state = TransferState::Queued;
            entry.task = Some(task);
        }
    }

    fn spawn_attempt(
        &self,
        id: RequestId,
        spec: FetchSpec,
        delay: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();

        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = events.send(EngineEvent::Started(id));
            let outcome = transport.fetch(&spec).await;
            let _ = events.send(EngineEvent::Finished(id, outcome));
        })
    }
}

impl<T> Drop for TransferManager<T> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Modification time of a cached file, if it exists.
pub fn local_modified(path: &std::path::Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
