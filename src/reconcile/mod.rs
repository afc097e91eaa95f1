// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resource reconciliation.
//!
//! Decides what a freshly fetched index document means for the display:
//!
//! | index vs. current | resources vs. current | result                 |
//! |-------------------|-----------------------|------------------------|
//! | equal             | equal                 | nothing                |
//! | equal             | different             | reload assets          |
//! | different         | (not compared)        | full reconfiguration   |
//!
//! Adoption is all or nothing. A [`PendingReconcile`] collects the resource
//! files of a new document; only [`Reconciler::finish`] publishes anything,
//! and it swaps complete `Arc` snapshots.

pub mod document;
pub mod resources;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub use document::{ConfigDocument, ResourceEntry};
pub use resources::{load_resource, ResourceTable};

/// Load/unload entry points of the presentation layer.
///
/// Called synchronously from [`Reconciler::finish`]. Implementations must
/// return promptly; they run inside the host's frame.
pub trait Presentation {
    /// Resource files changed under an unchanged configuration: tear down
    /// assets derived from the old table, reload them, refresh views.
    fn resources_changed(&mut self, document: &ConfigDocument, resources: &Arc<ResourceTable>);

    /// A different configuration was adopted: discard every asset and view
    /// and rebuild from `document`.
    fn configuration_changed(&mut self, document: &ConfigDocument, resources: &Arc<ResourceTable>);
}

/// What a completed reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Index and resources identical to the active ones
    Unchanged,
    /// Same index, different resource content
    ResourcesChanged,
    /// New index adopted
    Reconfigured,
}

/// A new document waiting for its resource files.
#[derive(Debug)]
pub struct PendingReconcile {
    document: ConfigDocument,
    /// name -> identifier, not yet fetched
    outstanding: BTreeMap<String, String>,
    table: ResourceTable,
}

impl PendingReconcile {
    fn new(document: ConfigDocument) -> Self {
        let outstanding = document
            .resources()
            .into_iter()
            .map(|entry| (entry.name, entry.identifier))
            .collect();
        Self {
            document,
            outstanding,
            table: ResourceTable::new(),
        }
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// Resources still to be fetched, as (name, identifier).
    pub fn outstanding(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outstanding.iter().map(|(n, i)| (n.as_str(), i.as_str()))
    }

    /// Record the parsed content of a resource.
    pub fn resolve(&mut self, name: &str, content: Value) {
        if self.outstanding.remove(name).is_some() {
            self.table.insert(name, content);
        }
    }

    /// Give up on a resource; it will be absent from the new table.
    pub fn skip(&mut self, name: &str) {
        self.outstanding.remove(name);
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Holds the active configuration and resource table.
///
/// Only the reconciler writes them. Readers get `Arc` snapshots that stay
/// complete and consistent even if a newer one is published meanwhile.
#[derive(Debug, Default)]
pub struct Reconciler {
    document: Option<Arc<ConfigDocument>>,
    resources: Arc<ResourceTable>,
    refresh: Option<Duration>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> Option<Arc<ConfigDocument>> {
        self.document.clone()
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    pub fn resources(&self) -> Arc<ResourceTable> {
        Arc::clone(&self.resources)
    }

    /// Index poll period of the active configuration.
    pub fn refresh(&self) -> Option<Duration> {
        self.refresh
    }

    pub fn get_resource_node(&self, resource: &str, node: &str) -> Value {
        self.resources.get_resource_node(resource, node).clone()
    }

    /// Start reconciling a parsed document. Nothing is published yet.
    pub fn begin(&self, document: ConfigDocument) -> PendingReconcile {
        PendingReconcile::new(document)
    }

    /// Publish the outcome of a completed reconciliation.
    ///
    /// Resources that were neither resolved nor skipped are treated as
    /// skipped.
    pub fn finish(
        &mut self,
        pending: PendingReconcile,
        presentation: &mut dyn Presentation,
    ) -> ReconcileOutcome {
        if !pending.is_complete() {
            tracing::warn!(
                "Reconciling with {} resource(s) never fetched",
                pending.outstanding.len()
            );
        }
        let PendingReconcile { document, table, .. } = pending;

        match &self.document {
            Some(current) if **current == document => {
                if *self.resources == table {
                    return ReconcileOutcome::Unchanged;
                }
                // Same document: keep the existing snapshot, swap resources.
                let current = Arc::clone(current);
                self.resources = Arc::new(table);
                tracing::info!("Resources changed, reloading assets");
                presentation.resources_changed(&current, &self.resources);
                ReconcileOutcome::ResourcesChanged
            }
            _ => {
                self.resources = Arc::new(table);
                self.refresh = document.refresh();
                let document = Arc::new(document);
                self.document = Some(Arc::clone(&document));
                tracing::info!(
                    resources = self.resources.len(),
                    refresh_secs = self.refresh.map(|d| d.as_secs_f64()),
                    "New configuration adopted"
                );
                presentation.configuration_changed(&document, &self.resources);
                ReconcileOutcome::Reconfigured
            }
        }
    }
}
