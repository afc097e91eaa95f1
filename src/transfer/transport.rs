// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP transport behind the transfer manager.
//!
//! The manager only needs three exchanges: an asynchronous GET it can
//! multiplex, a blocking GET for `fetch_now`, and a HEAD probe for file ages.
//! [`HttpTransport`] implements them with `reqwest`.

use std::error::Error as _;
use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;

use super::types::{FetchResponse, FetchSpec};
use crate::error::{FatalCondition, TransferError};

/// Default timeout for establishing a connection (in seconds).
pub const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Network exchanges the transfer manager relies on.
pub trait Transport: Send + Sync + 'static {
    /// GET driven by the manager's runtime. Must not borrow `self`.
    fn fetch(&self, spec: &FetchSpec) -> BoxFuture<'static, Result<FetchResponse, TransferError>>;

    /// GET that blocks the calling thread without touching the manager's runtime.
    fn fetch_blocking(&self, spec: &FetchSpec) -> Result<FetchResponse, TransferError>;

    /// HEAD probe for the remote modification time.
    fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransferError>;
}

/// `reqwest` based transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    blocking: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout.
    ///
    /// Must be called outside any async runtime: the blocking client owns
    /// its own background thread.
    pub fn new(connect_timeout: Duration) -> Result<Self, FatalCondition> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FatalCondition::Client(e.to_string()))?;
        let blocking = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FatalCondition::Client(e.to_string()))?;
        Ok(Self { client, blocking })
    }

    pub fn with_defaults() -> Result<Self, FatalCondition> {
        Self::new(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, spec: &FetchSpec) -> BoxFuture<'static, Result<FetchResponse, TransferError>> {
        let client = self.client.clone();
        let spec = spec.clone();

        Box::pin(async move {
            let mut request = client.get(&spec.url);
            if let Some(since) = spec.if_modified_since {
                request = request.header(IF_MODIFIED_SINCE, http_date(since));
            }

            let response = request.send().await.map_err(|e| classify(&spec.url, &e))?;
            let status = response.status();
            if status == StatusCode::NOT_MODIFIED {
                return Ok(FetchResponse::NotModified);
            }
            if !status.is_success() {
                return Err(TransferError::Status {
                    url: spec.url,
                    status: status.as_u16(),
                });
            }

            let last_modified = parse_last_modified(response.headers());
            let bytes = response
                .bytes()
                .await
                .map_err(|e| classify(&spec.url, &e))?;
            Ok(FetchResponse::Body {
                bytes: bytes.to_vec(),
                last_modified,
            })
        })
    }

    fn fetch_blocking(&self, spec: &FetchSpec) -> Result<FetchResponse, TransferError> {
        let mut request = self.blocking.get(&spec.url);
        if let Some(since) = spec.if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, http_date(since));
        }

        let response = request.send().map_err(|e| classify(&spec.url, &e))?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse::NotModified);
        }
        if !status.is_success() {
            return Err(TransferError::Status {
                url: spec.url.clone(),
                status: status.as_u16(),
            });
        }

        let last_modified = parse_last_modified(response.headers());
        let bytes = response.bytes().map_err(|e| classify(&spec.url, &e))?;
        Ok(FetchResponse::Body {
            bytes: bytes.to_vec(),
            last_modified,
        })
    }

    fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransferError> {
        let response = self.blocking.head(url).send().map_err(|e| classify(url, &e))?;
        if !response.status().is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(parse_last_modified(response.headers()))
    }
}

/// Map a `reqwest` failure onto the transfer taxonomy.
///
/// Only refused or timed-out connects count as unreachable. DNS and TLS
/// failures are connect errors too, but they will not fix themselves.
pub(crate) fn classify(url: &str, err: &reqwest::Error) -> TransferError {
    if is_unreachable(err) {
        TransferError::Unreachable {
            url: url.to_string(),
            reason: root_cause(err),
        }
    } else {
        TransferError::Network {
            url: url.to_string(),
            reason: root_cause(err),
        }
    }
}

fn is_unreachable(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    if err.is_timeout() {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

fn root_cause(err: &reqwest::Error) -> String {
    let mut deepest: &dyn std::error::Error = err;
    while let Some(next) = deepest.source() {
        deepest = next;
    }
    deepest.to_string()
}

/// RFC 7231 IMF-fixdate.
pub(crate) fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}
