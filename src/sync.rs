// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-tick driver that glues transfers and reconciliation together.
//!
//! The host calls [`SyncEngine::tick`] once per frame. Each tick polls the
//! transfer manager, routes completions by their [`Job`], publishes a
//! finished reconciliation and, if it is time, asks for the index again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{Failure, FatalCondition, SyncError, TransferError};
use crate::reconcile::{
    load_resource, ConfigDocument, PendingReconcile, Presentation, ReconcileOutcome, Reconciler,
    ResourceTable,
};
use crate::transfer::{Completion, RequestId, TransferManager, TransferRequest};

/// Continuation attached to every transfer the engine submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Index,
    Resource { batch: u64, name: String },
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Identifier of the index document
    pub index: String,
    /// Local file parsed instead of each downloaded index
    pub index_override: Option<PathBuf>,
    /// Wait after a failed index fetch while nothing is adopted yet
    pub retry_interval: Duration,
    /// Treat an unparseable first index as fatal
    pub abort_on_invalid_first_index: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            index: "/index.json".to_string(),
            index_override: None,
            retry_interval: Duration::from_secs(5),
            abort_on_invalid_first_index: true,
        }
    }
}

/// A transfer that ended in a terminal failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTransfer {
    pub identifier: String,
    pub error: TransferError,
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub outcome: Option<ReconcileOutcome>,
    pub failures: Vec<FailedTransfer>,
}

/// Resource files being collected for one index document.
struct Batch {
    id: u64,
    pending: PendingReconcile,
    requests: HashMap<RequestId, String>,
}

pub struct SyncEngine<P: Presentation> {
    transfers: TransferManager<Job>,
    reconciler: Reconciler,
    presentation: P,
    options: EngineOptions,
    batch: Option<Batch>,
    next_batch: u64,
    index_request: Option<RequestId>,
    last_index_request: Option<Instant>,
    last_index_failure: Option<Instant>,
    forced: bool,
}

impl<P: Presentation> SyncEngine<P> {
    pub fn new(transfers: TransferManager<Job>, presentation: P, options: EngineOptions) -> Self {
        Self {
            transfers,
            reconciler: Reconciler::new(),
            presentation,
            options,
            batch: None,
            next_batch: 0,
            index_request: None,
            last_index_request: None,
            last_index_failure: None,
            forced: false,
        }
    }

    /// Advance everything by one step.
    ///
    /// Only a [`FatalCondition`] is returned as an error; transfer failures
    /// are listed in the report and otherwise handled here.
    pub fn tick(&mut self, now: Instant) -> Result<TickReport, SyncError> {
        let mut report = TickReport::default();

        for completion in self.transfers.poll() {
            match completion {
                Completion::Succeeded {
                    id,
                    local_path,
                    continuation,
                    ..
                } => match continuation {
                    Some(Job::Index) => {
                        if self.index_request == Some(id) {
                            self.index_request = None;
                        }
                        self.index_ready(&local_path, now)?;
                    }
                    Some(Job::Resource { batch, name }) => {
                        self.resource_ready(id, batch, &name, &local_path);
                    }
                    None => {}
                },
                Completion::Failed { id, identifier, error } => {
                    tracing::warn!(
                        "Error in getting file {}",
                        Failure {
                            identifier: &identifier,
                            error: &error
                        }
                    );
                    self.transfer_failed(id, &identifier, now);
                    report.failures.push(FailedTransfer { identifier, error });
                }
            }
        }

        if self.batch.as_ref().is_some_and(|b| b.pending.is_complete()) {
            if let Some(batch) = self.batch.take() {
                let outcome = self.reconciler.finish(batch.pending, &mut self.presentation);
                tracing::debug!(batch = batch.id, ?outcome, "Reconciliation finished");
                report.outcome = Some(outcome);
            }
        }

        if self.index_due(now) {
            self.request_index(now);
        }

        Ok(report)
    }

    /// Fetch the index at the next tick regardless of the refresh period.
    pub fn force_refresh(&mut self) {
        self.forced = true;
    }

    /// True while resource files of a new index are still being collected.
    pub fn is_reconciling(&self) -> bool {
        self.batch.is_some()
    }

    pub fn document(&self) -> Option<Arc<ConfigDocument>> {
        self.reconciler.document()
    }

    pub fn resources(&self) -> Arc<ResourceTable> {
        self.reconciler.resources()
    }

    pub fn get_resource_node(&self, resource: &str, node: &str) -> Value {
        self.reconciler.get_resource_node(resource, node)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    pub fn transfers(&self) -> &TransferManager<Job> {
        &self.transfers
    }

    pub fn transfers_mut(&mut self) -> &mut TransferManager<Job> {
        &mut self.transfers
    }

    /// Abandon pending work and cancel every transfer.
    pub fn shutdown(&mut self) -> usize {
        if self.batch.take().is_some() {
            tracing::debug!("Discarding unfinished reconciliation");
        }
        self.index_request = None;
        self.transfers.cancel_all()
    }

    fn index_due(&self, now: Instant) -> bool {
        if self.batch.is_some()
            || self.index_request.is_some()
            || self.transfers.is_queued(&self.options.index)
        {
            return false;
        }
        if self.forced {
            return true;
        }

        let since = |at: Option<Instant>, period: Duration| {
            at.map_or(true, |at| now.saturating_duration_since(at) >= period)
        };
        match (self.reconciler.has_document(), self.reconciler.refresh()) {
            (_, Some(period)) => since(self.last_index_request, period),
            (false, None) => since(self.last_index_failure, self.options.retry_interval),
            (true, None) => false,
        }
    }

    fn request_index(&mut self, now: Instant) {
        let request = TransferRequest::new(self.options.index.as_str()).then(Job::Index);
        let handle = self.transfers.submit(request);
        tracing::trace!(request = %handle.id(), "Index requested");

        self.index_request = Some(handle.id());
        self.last_index_request = Some(now);
        self.forced = false;
    }

    fn index_ready(&mut self, downloaded: &Path, now: Instant) -> Result<(), SyncError> {
        let path = self.options.index_override.as_deref().unwrap_or(downloaded);

        let document = match ConfigDocument::load(path) {
            Ok(document) => document,
            Err(err) => {
                if !self.reconciler.has_document() && self.options.abort_on_invalid_first_index {
                    tracing::error!("Initial index unusable: {}", err);
                    return Err(FatalCondition::InvalidInitialIndex(err).into());
                }
                tracing::warn!("Ignoring invalid index, keeping current configuration: {}", err);
                self.last_index_failure = Some(now);
                return Ok(());
            }
        };

        let pending = self.reconciler.begin(document);
        let batch_id = self.next_batch;
        self.next_batch += 1;

        let wanted: Vec<(String, String)> = pending
            .outstanding()
            .map(|(name, identifier)| (name.to_string(), identifier.to_string()))
            .collect();

        let mut requests = HashMap::with_capacity(wanted.len());
        for (name, identifier) in wanted {
            let job = Job::Resource {
                batch: batch_id,
                name: name.clone(),
            };
            // Always the full file: a cache file's mtime says nothing about the server copy.
            let handle = self.transfers.submit(TransferRequest::new(identifier).then(job));
            requests.insert(handle.id(), name);
        }

        tracing::debug!(batch = batch_id, resources = requests.len(), "Index received");
        self.batch = Some(Batch {
            id: batch_id,
            pending,
            requests,
        });
        Ok(())
    }

    fn resource_ready(&mut self, id: RequestId, batch_id: u64, name: &str, path: &Path) {
        let Some(batch) = self.batch.as_mut().filter(|b| b.id == batch_id) else {
            tracing::debug!("Dropping resource \"{}\" of abandoned batch {}", name, batch_id);
            return;
        };
        batch.requests.remove(&id);

        match load_resource(path) {
            Ok(content) => batch.pending.resolve(name, content),
            Err(err) => {
                tracing::warn!("Skipping resource \"{}\": {}", name, err);
                batch.pending.skip(name);
            }
        }
    }

    /// A resource that could not be downloaded keeps its last good content,
    /// provided the active configuration took it from the same identifier.
    fn transfer_failed(&mut self, id: RequestId, identifier: &str, now: Instant) {
        if self.index_request == Some(id) {
            self.index_request = None;
            self.last_index_failure = Some(now);
            return;
        }
        let Some(batch) = self.batch.as_mut() else {
            return;
        };
        let Some(name) = batch.requests.remove(&id) else {
            return;
        };

        let same_source = self.reconciler.document().is_some_and(|current| {
            current
                .resources()
                .iter()
                .any(|entry| entry.name == name && entry.identifier == identifier)
        });
        let previous = if same_source {
            self.reconciler.resources().get(&name).cloned()
        } else {
            None
        };

        match previous {
            Some(content) => {
                tracing::warn!("Keeping previous content of resource \"{}\"", name);
                batch.pending.resolve(&name, content);
            }
            None => {
                tracing::warn!("Skipping resource \"{}\"", name);
                batch.pending.skip(&name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::Recorder;
    use crate::transfer::mock::MockTransport;
    use crate::transfer::{ManagerOptions, PathResolver};
    use chrono::TimeZone;
    use chrono::Utc;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const SERVER: &str = "http://h:7859";
    const INDEX_URL: &str = "http://h:7859/index.json";

    fn engine(dir: &TempDir, options: EngineOptions) -> (SyncEngine<Recorder>, MockTransport) {
        let mock = MockTransport::new();
        let transfers = TransferManager::with_transport(
            PathResolver::new(SERVER, dir.path().join("cache")),
            Arc::new(mock.clone()),
            ManagerOptions {
                retry_delay: Duration::ZERO,
            },
        )
        .unwrap();
        (SyncEngine::new(transfers, Recorder::default(), options), mock)
    }

    /// Tick at `now` until a reconciliation finishes.
    fn settle(engine: &mut SyncEngine<Recorder>, now: Instant) -> Option<ReconcileOutcome> {
        for _ in 0..20 {
            if let Some(outcome) = engine.tick(now).unwrap().outcome {
                return Some(outcome);
            }
        }
        None
    }

    #[test]
    fn test_scenario_identical_refetch_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {}, "settings": {"refresh": 5}}"#);
        let t0 = Instant::now();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        assert_eq!(engine.reconciler().refresh(), Some(Duration::from_secs(5)));

        // Not due yet.
        engine.tick(t0 + Duration::from_secs(2)).unwrap();
        engine.tick(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(mock.requests_for(INDEX_URL), 1);

        let later = t0 + Duration::from_secs(6);
        assert_eq!(settle(&mut engine, later), Some(ReconcileOutcome::Unchanged));
        assert_eq!(mock.requests_for(INDEX_URL), 2);
        assert_eq!(mock.last_request().unwrap().url, INDEX_URL);
        assert_eq!(engine.presentation().events, vec!["configuration"]);
    }

    #[test]
    fn test_scenario_changed_resource_reloads_without_readopting() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner.json"}}"#);
        mock.serve("http://h:7859/banner.json", r#"{"text": "Welcome"}"#);
        let t0 = Instant::now();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        let adopted = engine.document().unwrap();
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Welcome"));

        mock.serve("http://h:7859/banner.json", r#"{"text": "Closed today"}"#);
        engine.force_refresh();
        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::ResourcesChanged));

        assert_eq!(engine.presentation().events, vec!["configuration", "resources"]);
        assert!(Arc::ptr_eq(&adopted, &engine.document().unwrap()));
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Closed today"));
    }

    #[test]
    fn test_identical_index_and_resources_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {"text": "/text.json"}}"#);
        mock.serve("http://h:7859/text.json", r#"{"hello": ["Hi"]}"#);
        let t0 = Instant::now();

        settle(&mut engine, t0);
        let table = engine.resources();
        for _ in 0..3 {
            engine.force_refresh();
            assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Unchanged));
        }
        assert!(Arc::ptr_eq(&table, &engine.resources()));
        assert_eq!(engine.presentation().events.len(), 1);
    }

    #[test]
    fn test_invalid_index_keeps_previous_configuration() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {"text": "/text.json"}}"#);
        mock.serve("http://h:7859/text.json", r#"{"hello": "Hi"}"#);
        let t0 = Instant::now();
        settle(&mut engine, t0);
        let adopted = engine.document().unwrap();

        mock.serve(INDEX_URL, "{\"resources\": ");
        engine.force_refresh();
        assert_eq!(settle(&mut engine, t0), None);

        assert!(Arc::ptr_eq(&adopted, &engine.document().unwrap()));
        assert_eq!(engine.get_resource_node("text", "hello"), json!("Hi"));
        assert_eq!(engine.presentation().events, vec!["configuration"]);
    }

    #[test]
    fn test_adoption_waits_for_whole_batch() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {"a": "/a.json", "b": "/b.json"}}"#);
        mock.serve("http://h:7859/a.json", r#"{"v": 1}"#);
        mock.serve("http://h:7859/b.json", r#"{"v": 2}"#);
        mock.refuse_next("http://h:7859/b.json", 5);
        let t0 = Instant::now();

        // Submit index, receive index, receive a.
        for _ in 0..3 {
            assert!(engine.tick(t0).unwrap().outcome.is_none());
        }
        assert!(engine.is_reconciling());
        assert!(engine.document().is_none());
        assert!(engine.resources().is_empty());
        assert!(engine.presentation().events.is_empty());

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        assert_eq!(engine.resources().len(), 2);
        assert_eq!(mock.requests_for("http://h:7859/b.json"), 6);
    }

    #[test]
    fn test_bad_resources_are_skipped() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(
            INDEX_URL,
            r#"{"resources": {"broken": "/broken.json", "gone": "/gone.json", "ok": "/ok.json"}}"#,
        );
        mock.serve("http://h:7859/broken.json", "not json at all");
        mock.serve("http://h:7859/ok.json", r#"{"k": true}"#);
        let t0 = Instant::now();

        let mut failures = Vec::new();
        let mut outcome = None;
        for _ in 0..10 {
            let report = engine.tick(t0).unwrap();
            failures.extend(report.failures);
            if report.outcome.is_some() {
                outcome = report.outcome;
                break;
            }
        }

        assert_eq!(outcome, Some(ReconcileOutcome::Reconfigured));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].identifier, "/gone.json");
        let table = engine.resources();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[test]
    fn test_failed_first_download_does_not_stick() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        let banner = "http://h:7859/banner.json";
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner.json"}}"#);
        mock.serve(banner, r#"{"text": "Welcome"}"#);
        mock.set_age(banner, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        mock.fail_next(
            banner,
            TransferError::Status {
                url: banner.to_string(),
                status: 500,
            },
        );
        let t0 = Instant::now();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        assert!(engine.get_resource_node("banner", "text").is_null());

        engine.force_refresh();
        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::ResourcesChanged));
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Welcome"));
        assert_eq!(mock.last_request().unwrap().if_modified_since, None);

        engine.force_refresh();
        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Unchanged));
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Welcome"));
    }

    #[test]
    fn test_resources_are_refetched_in_full() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        let banner = "http://h:7859/banner.json";
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner.json"}}"#);
        mock.serve(banner, r#"{"text": "Welcome"}"#);
        // Older than the cached copy: a conditional request would get 304.
        mock.set_age(banner, Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());
        let t0 = Instant::now();

        settle(&mut engine, t0);
        mock.serve(banner, r#"{"text": "Closed today"}"#);
        engine.force_refresh();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::ResourcesChanged));
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Closed today"));
        assert_eq!(mock.requests_for(banner), 2);
        assert_eq!(mock.last_request().unwrap().if_modified_since, None);
    }

    #[test]
    fn test_network_failure_keeps_last_good_resource() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        let banner = "http://h:7859/banner.json";
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner.json"}}"#);
        mock.serve(banner, r#"{"text": "Welcome"}"#);
        let t0 = Instant::now();
        settle(&mut engine, t0);
        let table = engine.resources();

        mock.fail_next(
            banner,
            TransferError::Status {
                url: banner.to_string(),
                status: 503,
            },
        );
        engine.force_refresh();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Unchanged));
        assert_eq!(engine.presentation().events, vec!["configuration"]);
        assert!(Arc::ptr_eq(&table, &engine.resources()));
        assert_eq!(engine.get_resource_node("banner", "text"), json!("Welcome"));
    }

    #[test]
    fn test_failed_resource_under_new_source_is_not_carried_over() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner.json"}}"#);
        mock.serve("http://h:7859/banner.json", r#"{"text": "Welcome"}"#);
        let t0 = Instant::now();
        settle(&mut engine, t0);

        // Same name, different file, which is missing on the server.
        mock.serve(INDEX_URL, r#"{"resources": {"banner": "/banner-v2.json"}}"#);
        engine.force_refresh();

        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        assert!(engine.get_resource_node("banner", "text").is_null());
    }

    #[test]
    fn test_no_index_request_while_batch_pending() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(
            INDEX_URL,
            r#"{"resources": {"slow": "/slow.json"}, "settings": {"refresh": 1}}"#,
        );
        mock.serve("http://h:7859/slow.json", "{}");
        mock.refuse_next("http://h:7859/slow.json", 1000);
        let t0 = Instant::now();

        for secs in 0..30 {
            engine.tick(t0 + Duration::from_secs(secs)).unwrap();
        }
        engine.force_refresh();
        engine.tick(t0 + Duration::from_secs(60)).unwrap();

        assert!(engine.is_reconciling());
        assert_eq!(mock.requests_for(INDEX_URL), 1);
    }

    #[test]
    fn test_index_without_refresh_is_fetched_once() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {}}"#);
        let t0 = Instant::now();

        settle(&mut engine, t0);
        for hours in 1..5 {
            engine.tick(t0 + Duration::from_secs(hours * 3600)).unwrap();
        }
        assert_eq!(mock.requests_for(INDEX_URL), 1);

        engine.force_refresh();
        engine.tick(t0).unwrap();
        engine.tick(t0).unwrap();
        assert_eq!(mock.requests_for(INDEX_URL), 2);
    }

    #[test]
    fn test_index_override_replaces_downloaded_copy() {
        let dir = TempDir::new().unwrap();
        let override_path = dir.path().join("local-index.json");
        fs::write(&override_path, r#"{"resources": {}, "objects": {"clock": {}}}"#).unwrap();
        let options = EngineOptions {
            index_override: Some(override_path),
            ..EngineOptions::default()
        };
        let (mut engine, mock) = engine(&dir, options);
        mock.serve(INDEX_URL, r#"{"resources": {}}"#);

        settle(&mut engine, Instant::now());
        let document = engine.document().unwrap();
        assert!(document.objects().get("clock").is_some());
        assert_eq!(mock.requests_for(INDEX_URL), 1);
    }

    #[test]
    fn test_invalid_first_index_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, "[1, 2, 3]");
        let t0 = Instant::now();

        engine.tick(t0).unwrap();
        let err = engine.tick(t0).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Fatal(FatalCondition::InvalidInitialIndex(_))
        ));
    }

    #[test]
    fn test_invalid_first_index_waits_when_not_aborting() {
        let dir = TempDir::new().unwrap();
        let options = EngineOptions {
            abort_on_invalid_first_index: false,
            ..EngineOptions::default()
        };
        let (mut engine, mock) = engine(&dir, options);
        mock.serve(INDEX_URL, "oops");
        let t0 = Instant::now();

        engine.tick(t0).unwrap();
        engine.tick(t0).unwrap();
        engine.tick(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(mock.requests_for(INDEX_URL), 1);
        assert!(engine.document().is_none());

        mock.serve(INDEX_URL, r#"{"resources": {}}"#);
        assert_eq!(
            settle(&mut engine, t0 + Duration::from_secs(6)),
            Some(ReconcileOutcome::Reconfigured)
        );
        assert_eq!(mock.requests_for(INDEX_URL), 2);
    }

    #[test]
    fn test_missing_index_is_retried_after_interval() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        let t0 = Instant::now();

        engine.tick(t0).unwrap();
        let report = engine.tick(t0).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            TransferError::Status { status: 404, .. }
        ));

        engine.tick(t0 + Duration::from_secs(3)).unwrap();
        engine.tick(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(mock.requests_for(INDEX_URL), 1);

        engine.tick(t0 + Duration::from_secs(5)).unwrap();
        engine.tick(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(mock.requests_for(INDEX_URL), 2);
    }

    #[test]
    fn test_unreachable_server_is_silent() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.serve(INDEX_URL, r#"{"resources": {}}"#);
        mock.refuse_next(INDEX_URL, 3);
        let t0 = Instant::now();

        for _ in 0..4 {
            let report = engine.tick(t0).unwrap();
            assert!(report.failures.is_empty());
            assert!(report.outcome.is_none());
        }
        assert_eq!(settle(&mut engine, t0), Some(ReconcileOutcome::Reconfigured));
        assert_eq!(mock.requests_for(INDEX_URL), 4);
    }

    #[test]
    fn test_shutdown_cancels_outstanding_work() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mock) = engine(&dir, EngineOptions::default());
        mock.refuse_next(INDEX_URL, 1000);
        let t0 = Instant::now();

        engine.tick(t0).unwrap();
        engine.tick(t0).unwrap();
        assert_eq!(engine.shutdown(), 1);
        assert_eq!(engine.transfers().in_flight(), 0);
    }
}
