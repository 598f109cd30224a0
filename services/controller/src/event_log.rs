//! Event sinks.
//!
//! The scheduler emits one `AllocationEvent` per committed transition. Sinks
//! must not block the actor: `emit` only hands the event off. A failing sink
//! is logged and never fails an engine operation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hotplug_events::{AllocationEvent, EventAction, EventError};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink is closed")]
    Closed,

    #[error(transparent)]
    Encode(#[from] EventError),

    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for allocation events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &AllocationEvent) -> Result<(), SinkError>;
}

// =============================================================================
// JSON lines file
// =============================================================================

/// Appends one JSON object per line to a file.
///
/// Writes happen on a background task; `close` waits for them to finish.
pub struct JsonlEventSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
}

impl JsonlEventSink {
    /// Opens (or creates) `path` for appending and starts the writer task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let log_path = path.clone();
        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let result = async {
                    file.write_all(line.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                    file.flush().await
                }
                .await;
                if let Err(e) = result {
                    error!(path = %log_path.display(), error = %e, "Failed to append event");
                }
            }
        });

        Ok(Self {
            path,
            tx,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting events and waits until every queued line is written.
    pub async fn close(self) {
        let Self { tx, writer, .. } = self;
        drop(tx);
        let _ = writer.await;
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, event: &AllocationEvent) -> Result<(), SinkError> {
        let line = event.to_json_line()?;
        self.tx.send(line).map_err(|_| SinkError::Closed)
    }
}

// =============================================================================
// tracing
// =============================================================================

/// Logs each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &AllocationEvent) -> Result<(), SinkError> {
        let detail = serde_json::to_string(&event.detail).map_err(EventError::from)?;
        info!(
            event_id = %event.event_id,
            action = %event.action(),
            subject = %event.subject,
            detail = %detail,
            "Allocation event"
        );
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Keeps events in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<AllocationEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AllocationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<EventAction> {
        self.events().iter().map(AllocationEvent::action).collect()
    }

    pub fn count(&self, action: EventAction) -> usize {
        self.actions().into_iter().filter(|a| *a == action).count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &AllocationEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|_| SinkError::Closed)?
            .push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Sends every event to each inner sink; the first error is returned after
/// all sinks have been tried.
#[derive(Default, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MultiSink {
    fn emit(&self, event: &AllocationEvent) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
