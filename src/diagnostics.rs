// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup and the in-memory diagnostic log.
//!
//! Everything goes through `tracing`. Two layers are installed:
//! - a formatter writing to stderr, filtered by `RUST_LOG`
//! - [`DiagnosticLog`], which keeps the most recent lines in memory so a
//!   display can show them on screen: warnings and errors in one buffer,
//!   debug and info lines in another

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::layer::{Context, SubscriberExt as _};
use tracing_subscriber::util::{SubscriberInitExt as _, TryInitError};
use tracing_subscriber::Layer;

/// Lines kept per buffer when nothing else is configured.
pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug)]
struct Buffers {
    capacity: usize,
    errors: VecDeque<String>,
    debug: VecDeque<String>,
}

impl Buffers {
    fn push(queue: &mut VecDeque<String>, capacity: usize, line: String) {
        if capacity == 0 {
            return;
        }
        while queue.len() >= capacity {
            queue.pop_front();
        }
        queue.push_back(line);
    }
}

/// Bounded rolling log, shared between the tracing layer and readers.
///
/// Cloning is cheap; clones see the same buffers.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    inner: Arc<RwLock<Buffers>>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Buffers {
                capacity,
                errors: VecDeque::with_capacity(capacity),
                debug: VecDeque::with_capacity(capacity),
            })),
        }
    }

    /// Recent warnings and errors, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.read(|b| b.errors.iter().cloned().collect())
    }

    /// Recent info and debug lines, oldest first.
    pub fn debug(&self) -> Vec<String> {
        self.read(|b| b.debug.iter().cloned().collect())
    }

    pub fn clear(&self) {
        let mut buffers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        buffers.errors.clear();
        buffers.debug.clear();
    }

    // Poisoning is recovered silently: logging from inside the layer would
    // re-enter it while the lock is held.
    fn read<R>(&self, f: impl FnOnce(&Buffers) -> R) -> R {
        let buffers = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&buffers)
    }

    fn record(&self, level: Level, line: String) {
        let mut buffers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let capacity = buffers.capacity;
        match level {
            Level::ERROR | Level::WARN => Buffers::push(&mut buffers.errors, capacity, line),
            Level::INFO | Level::DEBUG => Buffers::push(&mut buffers.debug, capacity, line),
            _ => {}
        }
    }
}

/// Collects the message and any extra fields of an event into one line.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::TRACE {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "[{}] {:<5} {}{}",
            chrono::Local::now().format("%H:%M:%S"),
            level.to_string(),
            visitor.message,
            visitor.fields
        );
        self.record(level, line);
    }
}

/// Install the global subscriber and return the diagnostic log it feeds.
///
/// `RUST_LOG` takes precedence for stderr output; otherwise `info`, or
/// `debug` when `verbose` is set. The diagnostic log always records this
/// crate's debug lines and other crates' warnings.
pub fn init_logging(verbose: bool, capacity: usize) -> Result<DiagnosticLog, TryInitError> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,dispsync={}", default_level))
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let log = DiagnosticLog::new(capacity);
    let diagnostic_layer = log.clone().with_filter(
        Targets::new()
            .with_target("dispsync", LevelFilter::DEBUG)
            .with_default(LevelFilter::WARN),
    );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(diagnostic_layer)
        .try_init()?;

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry;

    fn capture(capacity: usize, f: impl FnOnce()) -> DiagnosticLog {
        let log = DiagnosticLog::new(capacity);
        let subscriber = registry().with(log.clone());
        tracing::subscriber::with_default(subscriber, f);
        log
    }

    #[test]
    fn test_levels_go_to_separate_buffers() {
        let log = capture(10, || {
            tracing::error!("cache directory missing");
            tracing::warn!("Skipping resource \"{}\"", "banner");
            tracing::info!("New configuration adopted");
            tracing::debug!("Successful download of file \"{}\"", "/index.json");
            tracing::trace!("still unreachable");
        });

        let errors = log.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("cache directory missing"));
        assert!(errors[1].contains("Skipping resource \"banner\""));

        let debug = log.debug();
        assert_eq!(debug.len(), 2);
        assert!(debug[1].contains("/index.json"));
    }

    #[test]
    fn test_buffers_are_bounded() {
        let log = capture(3, || {
            for i in 0..10 {
                tracing::warn!("failure {}", i);
            }
        });
        let errors = log.errors();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].ends_with("failure 7"));
        assert!(errors[2].ends_with("failure 9"));
    }

    #[test]
    fn test_fields_are_kept() {
        let log = capture(5, || {
            tracing::info!(resources = 3, "New configuration adopted");
        });
        assert!(log.debug()[0].ends_with("New configuration adopted resources=3"));
    }

    #[test]
    fn test_zero_capacity_and_clear() {
        let silent = capture(0, || tracing::error!("dropped"));
        assert!(silent.errors().is_empty());

        let log = capture(5, || tracing::error!("kept"));
        assert_eq!(log.errors().len(), 1);
        log.clear();
        assert!(log.errors().is_empty());
    }
}
