// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identifier to (source URL, cache path) mapping.
//!
//! Two identifier forms are accepted:
//! 1. Starting with `/`: served by the default server.
//! 2. Anything else: already a URL.
//!
//! The cache is flat. Files are named by the identifier's last path segment,
//! so identical names from different servers overwrite each other.

use std::path::{Path, PathBuf};

use super::types::Resolved;

#[derive(Debug, Clone)]
pub struct PathResolver {
    default_server: String,
    cache_dir: PathBuf,
}

impl PathResolver {
    pub fn new(default_server: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_server: default_server.into().trim_end_matches('/').to_string(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn resolve(&self, identifier: &str) -> Resolved {
        Resolved {
            source: self.source_url(identifier),
            local_path: self.local_path(identifier),
        }
    }

    pub fn source_url(&self, identifier: &str) -> String {
        if identifier.starts_with('/') {
            format!("{}{}", self.default_server, identifier)
        } else {
            identifier.to_string()
        }
    }

    pub fn local_path(&self, identifier: &str) -> PathBuf {
        self.cache_dir.join(base_name(identifier))
    }
}

/// Last `/`-separated segment, ignoring any query string or fragment.
fn base_name(identifier: &str) -> &str {
    let trimmed = identifier
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(identifier)
        .trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        // "http://host/" or "" still need a file to land in
        _ => "index",
    }
}
