//! Core of the scanning station: the durable operation queue, the single
//! dispatch worker that drains it against the spreadsheet API, and the
//! controller that ties them to a frontend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use shared::operation::Operation;
use sheets_integration::SheetsConnector;
use storage::QueueStore;

pub mod connectivity;
pub mod dispatcher;
pub mod queue;

pub use connectivity::{ConnectivityProbe, TcpProbe};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use queue::OperationQueue;

/// Bounded wait for the worker to acknowledge a kill before shutdown
/// persistence proceeds without it.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// Station condition as the frontend should present it. Labels mirror the
/// status line the scanning display shows the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationStatus {
    Ok,
    NoConnectivity,
    RateLimited,
    AccessFailure,
    ApiFailure,
}

impl StationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StationStatus::Ok => "",
            StationStatus::NoConnectivity => "NO INTERNET CONNECTION",
            StationStatus::RateLimited => "API rate limit exceeded",
            StationStatus::AccessFailure => "SPREADSHEET ACCESS FAILURE",
            StationStatus::ApiFailure => "Unhandled API Error",
        }
    }
}

/// Events fanned out to whoever is watching the station.
#[derive(Debug, Clone)]
pub enum StationEvent {
    StatusChanged(StationStatus),
    OperationCompleted { id: Uuid, kind: String },
    /// The worker stopped. `fatal` means it escalated on a permanent or
    /// unknown failure; restart/alert policy belongs to the owner.
    DispatcherTerminated { fatal: bool },
}

/// Owns the queue, its durable store and the dispatch worker.
///
/// The foreground submits operations; exactly one background worker
/// consumes them. On shutdown the worker is stopped first (bounded
/// handshake), then whatever is still queued is persisted for the next
/// start.
pub struct StationController {
    queue: Arc<OperationQueue>,
    store: QueueStore,
    dispatcher: Option<Dispatcher>,
    events: broadcast::Sender<StationEvent>,
}

impl StationController {
    /// Rehydrates any persisted queue, clears the backing file so a crash
    /// cannot replay it, and spawns the dispatch worker. Must be called
    /// from within a tokio runtime.
    pub fn start(
        connector: Arc<dyn SheetsConnector>,
        probe: Arc<dyn ConnectivityProbe>,
        store: QueueStore,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let queue = Arc::new(OperationQueue::new());
        let persisted = store
            .load()
            .context("failed to rehydrate persisted queue")?;
        for op in persisted {
            queue.push_front(op);
        }
        store
            .clear()
            .context("failed to clear queue snapshot after rehydration")?;

        let (events, _) = broadcast::channel(256);
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&queue),
            connector,
            probe,
            events.clone(),
            config,
        );

        Ok(Self {
            queue,
            store,
            dispatcher: Some(dispatcher),
            events,
        })
    }

    /// Hands an operation to the worker. Never blocks.
    pub fn submit(&self, op: Operation) {
        info!(kind = %op.kind, id = %op.id, "operation queued");
        self.queue.push_front(op);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StationEvent> {
        self.events.subscribe()
    }

    /// Stops the worker (requeueing any in-flight operation) and persists
    /// whatever is still queued. Best-effort: persistence runs even when
    /// the worker already terminated abnormally or overruns the handshake.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.kill();
            if let Err(err) = dispatcher.join(SHUTDOWN_WAIT).await {
                warn!(error = %err, "proceeding to persistence without worker handshake");
            }
        }

        let remaining = self.queue.drain();
        self.store
            .save(&remaining)
            .context("failed to persist queue on shutdown")?;
        info!(persisted = remaining.len(), "queue persisted on shutdown");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod controller_tests;
