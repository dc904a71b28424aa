use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use shared::error::RemoteApiError;
use shared::operation::{Operation, OperationKind};
use sheets_integration::{SheetSession, SheetsConnector};

use crate::connectivity::ConnectivityProbe;
use crate::queue::OperationQueue;
use crate::{StationEvent, StationStatus};

/// Timing and budget knobs for the dispatch worker. The defaults are the
/// production values; tests shrink them to milliseconds.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wait between reachability checks while the internet is down.
    pub connectivity_retry: Duration,
    /// Base backoff after the remote API asks us to slow down.
    pub rate_limit_base: Duration,
    /// Linear growth added to the base per consecutive rate-limit error.
    pub rate_limit_step: Duration,
    /// Consecutive rate-limit errors tolerated before the worker gives up.
    pub max_api_tries: u32,
    /// Upper bound on how long an empty queue goes unchecked.
    pub idle_poll: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            connectivity_retry: Duration::from_secs(300),
            rate_limit_base: Duration::from_secs(300),
            rate_limit_step: Duration::from_secs(60),
            max_api_tries: 5,
            idle_poll: Duration::from_millis(5),
        }
    }
}

/// Idempotent stop signal that also cuts any in-progress backoff short.
pub(crate) struct KillSignal {
    killed: AtomicBool,
    notify: Notify,
}

impl KillSignal {
    fn new() -> Self {
        Self {
            killed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn kill(&self) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early when the signal fires. The
    /// notify permit makes a kill issued between the flag check and the
    /// wait still wake us.
    async fn sleep(&self, duration: Duration) {
        if self.is_killed() || duration.is_zero() {
            return;
        }
        let _ = timeout(duration, self.notify.notified()).await;
    }
}

/// Handle to the spawned dispatch worker.
pub struct Dispatcher {
    kill: Arc<KillSignal>,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawns the single consumer task. Must be called from within a tokio
    /// runtime.
    pub fn spawn(
        queue: Arc<OperationQueue>,
        connector: Arc<dyn SheetsConnector>,
        probe: Arc<dyn ConnectivityProbe>,
        events: broadcast::Sender<StationEvent>,
        config: DispatcherConfig,
    ) -> Self {
        let kill = Arc::new(KillSignal::new());
        let worker = Worker {
            queue,
            connector,
            probe,
            events,
            config,
            kill: Arc::clone(&kill),
            session: None,
        };
        let handle = tokio::spawn(worker.run());
        Self { kill, handle }
    }

    /// Signals the worker to stop. Safe to call any number of times.
    pub fn kill(&self) {
        self.kill.kill();
    }

    /// Waits for the worker to reach its stopped state, bounded by `wait`.
    pub async fn join(self, wait: Duration) -> Result<()> {
        match timeout(wait, self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(anyhow!("dispatch worker panicked: {join_err}")),
            Err(_elapsed) => Err(anyhow!(
                "dispatch worker did not stop within {}ms",
                wait.as_millis()
            )),
        }
    }
}

/// How one operation left the worker loop.
enum Flow {
    /// Operation finished (or was dropped as unresolvable); take the next.
    Continue,
    /// Worker must stop. `fatal` distinguishes escalation from a plain kill.
    Stop { fatal: bool },
}

enum ExecError {
    /// The operation names a kind with no remote action. Permanent for that
    /// operation, harmless for the worker.
    Unresolvable(String),
    Remote(RemoteApiError),
}

struct Worker {
    queue: Arc<OperationQueue>,
    connector: Arc<dyn SheetsConnector>,
    probe: Arc<dyn ConnectivityProbe>,
    events: broadcast::Sender<StationEvent>,
    config: DispatcherConfig,
    kill: Arc<KillSignal>,
    session: Option<Arc<dyn SheetSession>>,
}

impl Worker {
    async fn run(mut self) {
        info!("dispatch worker started");

        // The first thing the worker does is authorize, through the same
        // machinery as any queued operation so access failures escalate
        // with zero retries. The synthetic connect skips the courtesy
        // delay.
        let mut outcome = self.process(Operation::reconnect()).await;
        if matches!(outcome, Flow::Continue) {
            outcome = self.drain_loop().await;
        }

        let fatal = matches!(outcome, Flow::Stop { fatal: true });
        if fatal {
            error!("dispatch worker terminated abnormally");
        } else {
            info!("dispatch worker stopped");
        }
        let _ = self
            .events
            .send(StationEvent::DispatcherTerminated { fatal });
    }

    async fn drain_loop(&mut self) -> Flow {
        loop {
            if self.kill.is_killed() {
                return Flow::Stop { fatal: false };
            }
            let Some(op) = self.queue.pop_back() else {
                self.queue.idle_wait(self.config.idle_poll).await;
                continue;
            };
            match self.process(op).await {
                Flow::Continue => {}
                stop => return stop,
            }
        }
    }

    /// Runs one operation to completion: connectivity gate, execution,
    /// retry/backoff policy, courtesy delay. The operation is never dropped
    /// while retryable; a kill or a fatal error requeues it unfinished.
    async fn process(&mut self, op: Operation) -> Flow {
        let mut consecutive_api_errors: u32 = 0;

        loop {
            if self.kill.is_killed() {
                self.queue.requeue(op);
                return Flow::Stop { fatal: false };
            }

            if !self.probe.is_connected().await {
                self.set_status(StationStatus::NoConnectivity);
                warn!(
                    op = %op.kind,
                    retry_secs = self.config.connectivity_retry.as_secs(),
                    "cannot reach the internet; holding operation"
                );
                self.kill.sleep(self.config.connectivity_retry).await;
                continue;
            }

            match self.execute(&op).await {
                Ok(()) => {
                    self.set_status(StationStatus::Ok);
                    let _ = self.events.send(StationEvent::OperationCompleted {
                        id: op.id,
                        kind: op.kind.name().to_string(),
                    });
                    // Courtesy pause so a burst of scans cannot max the API
                    // quota. The item is already finished, so a kill here
                    // only shortens the nap.
                    self.kill.sleep(op.post_success_delay).await;
                    return Flow::Continue;
                }
                Err(ExecError::Unresolvable(name)) => {
                    warn!(kind = %name, id = %op.id, "operation has no remote action; dropping it");
                    return Flow::Continue;
                }
                Err(ExecError::Remote(RemoteApiError::RateLimited { retry_after })) => {
                    consecutive_api_errors += 1;
                    if consecutive_api_errors >= self.config.max_api_tries {
                        self.set_status(StationStatus::RateLimited);
                        error!(
                            op = %op.kind,
                            tries = consecutive_api_errors,
                            "API error count exceeded maximum tries"
                        );
                        self.queue.requeue(op);
                        return Flow::Stop { fatal: true };
                    }
                    let backoff =
                        rate_limit_backoff(&self.config, consecutive_api_errors, retry_after);
                    self.set_status(StationStatus::RateLimited);
                    warn!(
                        op = %op.kind,
                        tries = consecutive_api_errors,
                        backoff_secs = backoff.as_secs(),
                        "API rate limit exceeded; attempting retry"
                    );
                    self.kill.sleep(backoff).await;
                }
                Err(ExecError::Remote(RemoteApiError::Access(reason))) => {
                    self.set_status(StationStatus::AccessFailure);
                    error!(op = %op.kind, id = %op.id, %reason, "spreadsheet access failure");
                    self.queue.requeue(op);
                    return Flow::Stop { fatal: true };
                }
                Err(ExecError::Remote(err)) => {
                    self.set_status(StationStatus::ApiFailure);
                    error!(
                        op = %op.kind,
                        id = %op.id,
                        error = %err,
                        "unexpected remote failure; stopping dispatcher"
                    );
                    self.queue.requeue(op);
                    return Flow::Stop { fatal: true };
                }
            }
        }
    }

    async fn execute(&mut self, op: &Operation) -> Result<(), ExecError> {
        match &op.kind {
            OperationKind::AppendRow { values } => self
                .active_session()?
                .append_row(values)
                .await
                .map_err(ExecError::Remote),
            OperationKind::DeleteRow { start_index } => self
                .active_session()?
                .delete_row(*start_index)
                .await
                .map_err(ExecError::Remote),
            OperationKind::Reconnect => {
                // Drop the old handle first; a reconnect must never leave a
                // stale session behind on failure.
                self.session = None;
                let session = self.connector.connect().await.map_err(ExecError::Remote)?;
                self.session = Some(session);
                Ok(())
            }
            OperationKind::Custom { name } => Err(ExecError::Unresolvable(name.clone())),
        }
    }

    fn active_session(&self) -> Result<Arc<dyn SheetSession>, ExecError> {
        self.session
            .clone()
            .ok_or_else(|| ExecError::Remote(RemoteApiError::Transport(
                "no active spreadsheet session".to_string(),
            )))
    }

    fn set_status(&self, status: StationStatus) {
        let _ = self.events.send(StationEvent::StatusChanged(status));
    }
}

/// Linear backoff schedule, floored at whatever the server hinted.
fn rate_limit_backoff(
    config: &DispatcherConfig,
    consecutive: u32,
    hint: Option<Duration>,
) -> Duration {
    let scheduled = config.rate_limit_base + config.rate_limit_step * consecutive;
    match hint {
        Some(hinted) if hinted > scheduled => hinted,
        _ => scheduled,
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
