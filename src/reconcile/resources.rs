// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Parsed resource files, keyed by logical name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::ParseError;

static NULL: Value = Value::Null;

/// Resource name -> parsed content.
///
/// Compared by deep equality so a server-side change to any resource file is
/// noticed even when the index document is byte-for-byte the same.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTable {
    entries: BTreeMap<String, Value>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: Value) {
        self.entries.insert(name.into(), content);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `resource[node]`, or `null` when either is missing.
    pub fn get_resource_node(&self, resource: &str, node: &str) -> &Value {
        self.entries
            .get(resource)
            .and_then(|content| content.get(node))
            .unwrap_or(&NULL)
    }

    /// Follow an `{"external": true, "resource": .., "node": ..}` reference.
    ///
    /// Manifests in the index may point into a resource file instead of
    /// carrying their data inline. Anything that is not such a reference is
    /// returned as is.
    pub fn resolve_external<'a>(&'a self, value: &'a Value) -> &'a Value {
        if value.get("external").and_then(Value::as_bool) != Some(true) {
            return value;
        }
        let resource = value.get("resource").and_then(Value::as_str).unwrap_or_default();
        let node = value.get("node").and_then(Value::as_str).unwrap_or_default();
        self.get_resource_node(resource, node)
    }
}

impl FromIterator<(String, Value)> for ResourceTable {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Read a downloaded resource file. Any JSON value is accepted.
pub fn load_resource(path: &Path) -> Result<Value, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ParseError::Json {
        path: path.to_path_buf(),
        source,
    })
}
