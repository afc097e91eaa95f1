// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted transport for deterministic tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::future::{self, BoxFuture, FutureExt};

use super::transport::Transport;
use super::types::{FetchResponse, FetchSpec};
use crate::error::TransferError;

#[derive(Default)]
struct Script {
    bodies: HashMap<String, Vec<u8>>,
    ages: HashMap<String, DateTime<Utc>>,
    failures: HashMap<String, VecDeque<TransferError>>,
    requests: Vec<FetchSpec>,
    blocking_requests: Vec<FetchSpec>,
}

/// Cloneable handle; clones share one script.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.script.lock().unwrap().bodies.insert(url.to_string(), body.into());
    }

    pub fn set_age(&self, url: &str, age: DateTime<Utc>) {
        self.script.lock().unwrap().ages.insert(url.to_string(), age);
    }

    /// Queue failures returned before the served body.
    pub fn fail_next(&self, url: &str, error: TransferError) {
        self.script
            .lock()
            .unwrap()
            .failures
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn refuse_next(&self, url: &str, times: usize) {
        for _ in 0..times {
            self.fail_next(
                url,
                TransferError::Unreachable {
                    url: url.to_string(),
                    reason: "Connection refused".to_string(),
                },
            );
        }
    }

    /// Number of asynchronous requests issued for `url`.
    pub fn requests_for(&self, url: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|spec| spec.url == url)
            .count()
    }

    pub fn last_request(&self) -> Option<FetchSpec> {
        self.script.lock().unwrap().requests.last().cloned()
    }

    pub fn blocking_requests(&self) -> usize {
        self.script.lock().unwrap().blocking_requests.len()
    }

    fn answer(script: &mut Script, spec: &FetchSpec) -> Result<FetchResponse, TransferError> {
        if let Some(err) = script.failures.get_mut(&spec.url).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        let Some(bytes) = script.bodies.get(&spec.url).cloned() else {
            return Err(TransferError::Status {
                url: spec.url.clone(),
                status: 404,
            });
        };
        let age = script.ages.get(&spec.url).copied();
        match (spec.if_modified_since, age) {
            (Some(since), Some(age)) if age <= since => Ok(FetchResponse::NotModified),
            _ => Ok(FetchResponse::Body {
                bytes,
                last_modified: age,
            }),
        }
    }
}

impl Transport for MockTransport {
    fn fetch(&self, spec: &FetchSpec) -> BoxFuture<'static, Result<FetchResponse, TransferError>> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(spec.clone());
        let result = Self::answer(&mut script, spec);
        future::ready(result).boxed()
    }

    fn fetch_blocking(&self, spec: &FetchSpec) -> Result<FetchResponse, TransferError> {
        let mut script = self.script.lock().unwrap();
        script.blocking_requests.push(spec.clone());
        Self::answer(&mut script, spec)
    }

    fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransferError> {
        let script = self.script.lock().unwrap();
        if !script.bodies.contains_key(url) {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(script.ages.get(url).copied())
    }
}
