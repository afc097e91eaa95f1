// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The index document: the root configuration published by the server.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::error::ParseError;

static NULL: Value = Value::Null;

/// One `resources` manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Logical name consumers query by
    pub name: String,
    /// Where to fetch it from (path or URL)
    pub identifier: String,
}

/// Immutable snapshot of the whole configuration tree.
///
/// Equality is deep structural equality of the JSON values; object key
/// order does not matter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Read and parse a document from disk.
    pub fn load(path: &Path) -> Result<Self, ParseError> {
        let bytes = fs::read(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes, path)
    }

    /// Parse raw bytes. `origin` is only used in error messages.
    pub fn parse(bytes: &[u8], origin: &Path) -> Result<Self, ParseError> {
        let root: Value = serde_json::from_slice(bytes).map_err(|source| ParseError::Json {
            path: origin.to_path_buf(),
            source,
        })?;
        if !root.is_object() {
            return Err(ParseError::NotAnObject {
                path: origin.to_path_buf(),
            });
        }
        Ok(Self { root })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// The `sprites` manifest, opaque here. `null` if absent.
    pub fn sprites(&self) -> &Value {
        self.root.get("sprites").unwrap_or(&NULL)
    }

    /// The `objects` manifest, opaque here. `null` if absent.
    pub fn objects(&self) -> &Value {
        self.root.get("objects").unwrap_or(&NULL)
    }

    /// Entries of the `resources` map, in name order.
    ///
    /// Entries whose value is not a string are skipped.
    pub fn resources(&self) -> Vec<ResourceEntry> {
        let manifest = match self.root.get("resources") {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                tracing::warn!("\"resources\" should be an object, found {}", other);
                return Vec::new();
            }
        };

        manifest
            .iter()
            .filter_map(|(name, value)| match value.as_str() {
                Some(identifier) => Some(ResourceEntry {
                    name: name.clone(),
                    identifier: identifier.to_string(),
                }),
                None => {
                    tracing::warn!("Resource \"{}\" has no file path, skipping", name);
                    None
                }
            })
            .collect()
    }

    /// Seconds between index polls, from `settings.refresh`.
    ///
    /// `None` means fetch once and never poll again. That is the answer for
    /// an absent value, a non-numeric one, and anything not above zero.
    pub fn refresh(&self) -> Option<Duration> {
        let refresh = self.root.get("settings").and_then(|s| s.get("refresh"));
        match refresh {
            None | Some(Value::Null) => None,
            Some(Value::Number(seconds)) => seconds
                .as_f64()
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64),
            Some(other) => {
                tracing::warn!("Nonsense refresh time {}, choosing to not refresh", other);
                None
            }
        }
    }
}
