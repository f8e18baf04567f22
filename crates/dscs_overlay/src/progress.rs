//! Progress and log events emitted to the front end.
//!
//! The pipeline treats its host as a write-only channel: it emits
//! [`InstallEvent`]s through an optional callback and never waits on them.
//! Every event is mirrored to `tracing` so headless runs keep a full log.

use serde::Serialize;
use std::sync::Arc;

/// An event emitted while building and installing the patch archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum InstallEvent {
    /// A discrete milestone line.
    Log(String),
    /// Replaces the current progress line (per-job progress within a stage).
    Update(String),
    /// The host should lock its controls until [`ReleaseControls`](Self::ReleaseControls).
    LockControls,
    /// The run is over, successfully or not.
    ReleaseControls,
}

pub type ProgressCallback = Arc<dyn Fn(InstallEvent) + Send + Sync>;

/// Cheap, cloneable handle used by pipeline components to emit events.
#[derive(Clone, Default)]
pub struct EventSink {
    callback: Option<ProgressCallback>,
}

impl EventSink {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// A sink that only writes to `tracing`.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(InstallEvent::Log(message));
    }

    pub fn update(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        self.emit(InstallEvent::Update(message));
    }

    pub fn lock_controls(&self) {
        self.emit(InstallEvent::LockControls);
    }

    pub fn release_controls(&self) {
        self.emit(InstallEvent::ReleaseControls);
    }

    fn emit(&self, event: InstallEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
