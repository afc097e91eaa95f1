// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! dispsync - background content sync for display clients
//!
//! Keeps a flat local cache in step with a remote index document and the
//! resource files it names, without ever blocking the caller's frame.
//!
//! **Index** -> **Resource files** -> **Reconcile** -> **Presentation**
//!
//! # Core Modules
//!
//! - [`transfer`] - Multiplexed, frame-driven downloads with silent retry
//! - [`reconcile`] - Decides between no-op, asset reload and full reconfiguration
//! - [`sync`] - Per-tick driver tying the two together
//! - [`config`] - Persistent settings
//! - [`diagnostics`] - Logging setup and the on-screen rolling log
//! - [`error`] - Error taxonomy and user-facing formatting

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reconcile;
pub mod sync;
pub mod transfer;

pub use config::SyncConfig;
pub use diagnostics::{init_logging, DiagnosticLog};
pub use error::{format_error, FatalCondition, NetworkError, ParseError, SyncError, TransferError};
pub use reconcile::{
    ConfigDocument, Presentation, ReconcileOutcome, Reconciler, ResourceEntry, ResourceTable,
};
pub use sync::{EngineOptions, FailedTransfer, Job, SyncEngine, TickReport};
pub use transfer::{
    Completion, HttpTransport, PathResolver, TransferHandle, TransferManager, TransferRequest,
    TransferState, Transport,
};
