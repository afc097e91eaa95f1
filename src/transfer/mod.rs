// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Frame-driven transfer engine for dispsync
//!
//! This module keeps many downloads moving without a thread per download
//! and without ever blocking the caller's frame:
//! - `submit` admits a request and returns immediately
//! - `poll` advances everything by one non-blocking step
//! - unreachable servers are retried silently, other failures are reported
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────┐
//! │ TransferManager │────▶│ current-thread tokio │
//! │  submit / poll  │     │ runtime (one step    │
//! └────────┬────────┘     │ per poll)            │
//!          │              └──────────┬───────────┘
//!          ▼                         ▼
//! ┌─────────────────┐     ┌──────────────────────┐
//! │ Completion      │     │ Transport            │
//! │ Dispatcher      │     │ (reqwest)            │
//! └─────────────────┘     └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use dispsync::transfer::{Completion, TransferManager, TransferRequest};
//!
//! # fn example() -> Result<(), dispsync::error::FatalCondition> {
//! let mut manager: TransferManager<&str> =
//!     TransferManager::new("http://localhost:7859", "./dispFiles")?;
//!
//! manager.submit(TransferRequest::new("/index.json").then("index"));
//!
//! // Once per frame
//! for completion in manager.poll() {
//!     if let Completion::Succeeded { local_path, continuation, .. } = completion {
//!         println!("{:?} ready at {}", continuation, local_path.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod manager;
pub mod resolver;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

// Re-export commonly used items
pub use dispatch::Completion;
pub use manager::{local_modified, ManagerOptions, TransferManager, DEFAULT_RETRY_DELAY};
pub use resolver::PathResolver;
pub use transport::{HttpTransport, Transport};
pub use types::{
    FetchResponse, FetchSpec, Fetched, RequestId, Resolved, TransferHandle, TransferRequest,
    TransferState,
};
