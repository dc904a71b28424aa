//! Scriptable stand-ins for the capability seams the dispatcher drives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use shared::error::RemoteApiError;
use shared::operation::Operation;
use sheets_integration::{SheetSession, SheetsConnector};

use crate::connectivity::ConnectivityProbe;
use crate::dispatcher::DispatcherConfig;

pub(crate) struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub(crate) fn always(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: connected,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers from `script` first, then `fallback` forever.
    pub(crate) fn script(script: Vec<bool>, fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn is_connected(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[derive(Default)]
pub(crate) struct StubSession {
    appended: Mutex<Vec<Vec<String>>>,
    deleted: Mutex<Vec<u32>>,
    failures: Mutex<VecDeque<RemoteApiError>>,
    calls: AtomicUsize,
}

impl StubSession {
    pub(crate) fn fail_next(&self, errors: impl IntoIterator<Item = RemoteApiError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub(crate) fn appended(&self) -> Vec<Vec<String>> {
        self.appended.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<u32> {
        self.deleted.lock().unwrap().clone()
    }

    /// Number of append/delete calls that reached the session, successful
    /// or not.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<RemoteApiError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl SheetSession for StubSession {
    async fn append_row(&self, values: &[String]) -> Result<(), RemoteApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.appended.lock().unwrap().push(values.to_vec());
        Ok(())
    }

    async fn delete_row(&self, start_index: u32) -> Result<(), RemoteApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.deleted.lock().unwrap().push(start_index);
        Ok(())
    }
}

pub(crate) struct StubConnector {
    pub(crate) session: Arc<StubSession>,
    connect_failures: Mutex<VecDeque<RemoteApiError>>,
    attempts: AtomicUsize,
}

impl StubConnector {
    pub(crate) fn ok() -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(StubSession::default()),
            connect_failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fail_next(&self, errors: impl IntoIterator<Item = RemoteApiError>) {
        self.connect_failures.lock().unwrap().extend(errors);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetsConnector for StubConnector {
    async fn connect(&self) -> Result<Arc<dyn SheetSession>, RemoteApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.connect_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Arc::clone(&self.session) as Arc<dyn SheetSession>)
    }
}

/// Production backoffs shrunk to milliseconds so the retry machinery runs
/// in test time.
pub(crate) fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        connectivity_retry: Duration::from_millis(20),
        rate_limit_base: Duration::from_millis(20),
        rate_limit_step: Duration::from_millis(5),
        max_api_tries: 5,
        idle_poll: Duration::from_millis(5),
    }
}

pub(crate) fn quick_append(tag: &str) -> Operation {
    Operation::append_row(vec![tag.to_string()])
        .with_post_success_delay(Duration::from_millis(1))
}

pub(crate) fn quick_delete(start_index: u32) -> Operation {
    Operation::delete_row(start_index).with_post_success_delay(Duration::from_millis(1))
}

pub(crate) async fn wait_until(what: &str, deadline: Duration, mut cond: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drains events until the worker reports termination, asserting on the
/// fatal flag.
pub(crate) async fn expect_terminated(
    rx: &mut tokio::sync::broadcast::Receiver<crate::StationEvent>,
    want_fatal: bool,
) {
    let deadline = Duration::from_secs(5);
    let terminated = tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(crate::StationEvent::DispatcherTerminated { fatal }) => break fatal,
                Ok(_) => continue,
                Err(err) => panic!("event stream closed before termination: {err}"),
            }
        }
    })
    .await
    .expect("no termination event within deadline");
    assert_eq!(terminated, want_fatal, "unexpected termination kind");
}
