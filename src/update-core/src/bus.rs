//! Notification bus between the engines and the UI collaborator.
//!
//! Engines publish typed events; any number of subscribers receive them over
//! unbounded channels. Publication happens under one lock, so the order in
//! which a publisher emits is the order every subscriber observes. Plain
//! diagnostic messages are additionally retained for later inspection.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

use crate::types::Tristate;

/// Everything the updater reports outward.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// The lifecycle state changed; carries the display string.
    StateChanged {
        /// Display string of the new state.
        state: String,
    },
    /// The outcome of the current state.
    StateOutcomeChanged {
        /// Outcome of the new state.
        outcome: Tristate,
    },
    /// Whether the variant chooser should be showing.
    SelectingChanged {
        /// True exactly while initializing.
        selecting: bool,
    },
    /// The selected update version; empty while unresolved.
    VersionChanged {
        /// Version string.
        version: String,
    },
    /// DNS consensus check status.
    DnsValidChanged {
        /// Check status.
        valid: Tristate,
    },
    /// Artifact hash check status.
    HashValidChanged {
        /// Check status.
        valid: Tristate,
    },
    /// Count of distinct, known-signer, hash-matching signatures.
    ValidGitianSigsChanged {
        /// Current count.
        count: u32,
    },
    /// The signature threshold in force.
    MinValidGitianSigsChanged {
        /// Threshold value.
        count: u32,
    },
    /// Count of signer candidates processed so far.
    ProcessedGitianSigsChanged {
        /// Current count.
        count: u32,
    },
    /// Count of signer candidates discovered.
    TotalGitianSigsChanged {
        /// Total count.
        count: u32,
    },
    /// A human-readable diagnostic line.
    Message {
        /// Message text.
        text: String,
    },
    /// The artifact download began.
    DownloadStarted,
    /// Download progress; `total` is 0 when the length is unknown.
    DownloadProgress {
        /// Bytes received so far.
        downloaded: u64,
        /// Expected body length, or 0 when indeterminate.
        total: i64,
    },
    /// The download ended.
    DownloadFinished {
        /// Whether the body was fully received.
        success: bool,
    },
    /// A fully verified update is staged at `path`.
    ValidUpdateReady {
        /// Local path of the verified artifact.
        path: PathBuf,
    },
}

/// Thread-safe, order-preserving event fan-out.
#[derive(Default)]
pub struct NotificationBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<UnboundedSender<UpdateEvent>>,
    messages: Vec<String>,
}

impl NotificationBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events published before subscription are
    /// not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<UpdateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).subscribers.push(tx);
        rx
    }

    /// Publish one event to every live subscriber.
    pub fn publish(&self, event: UpdateEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let UpdateEvent::Message { text } = &event {
            inner.messages.push(text.clone());
        }
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publish a diagnostic message line.
    pub fn message(&self, text: impl Into<String>) {
        let text = text.into();
        info!("UI message: {}", text);
        self.publish(UpdateEvent::Message { text });
    }

    /// All messages published so far, in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .messages
            .clone()
    }
}
