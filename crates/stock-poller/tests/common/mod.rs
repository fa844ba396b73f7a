//! Test doubles for driving the poll loop without a network or wall clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stock_poller::{AnalysisTransport, Clock, StartError, TransportError};
use stock_proto::protocol::{JobStatus, StatusPayload, StepRecord, StepStatus, ANALYSIS_STEPS};
use tokio::sync::{watch, Semaphore};

pub type Reply = Result<StatusPayload, TransportError>;

/// Answers status requests from a fixed script.  Once the script runs out,
/// requests hang so an unexpected extra poll shows up as a stuck test rather
/// than a silent pass.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fetches: AtomicUsize,
    hold: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Like `new`, but each reply waits for a permit from `hold`.
    pub fn held(replies: impl IntoIterator<Item = Reply>, hold: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fetches: AtomicUsize::new(0),
            hold: Some(hold),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisTransport for ScriptedTransport {
    async fn start_analysis(&self, _ticker: &str) -> Result<String, StartError> {
        Ok("42".to_string())
    }

    async fn fetch_status(&self, _analysis_id: &str) -> Result<StatusPayload, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

/// Returns immediately, remembering every delay it was asked for.
#[derive(Default)]
pub struct RecordingClock {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays_ms(&self) -> Vec<u64> {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Each sleep blocks until the test calls `fire`.
pub struct GatedClock {
    delays: Mutex<Vec<Duration>>,
    sleeps: watch::Sender<usize>,
    gate: Semaphore,
}

impl GatedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(Vec::new()),
            sleeps: watch::channel(0).0,
            gate: Semaphore::new(0),
        })
    }

    /// Let `n` pending or future sleeps finish.
    pub fn fire(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until the poll loop has entered its `n`th sleep.
    pub async fn wait_for_sleep(&self, n: usize) {
        let mut rx = self.sleeps.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    pub fn delays_ms(&self) -> Vec<u64> {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Clock for GatedClock {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        self.sleeps.send_modify(|count| *count += 1);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

// ── Payload builders ──────────────────────────────────────────────────────────

pub fn steps(statuses: [StepStatus; 6]) -> Vec<StepRecord> {
    ANALYSIS_STEPS
        .iter()
        .zip(statuses)
        .map(|(name, status)| StepRecord::new(*name, status))
        .collect()
}

pub fn running(statuses: [StepStatus; 6]) -> Reply {
    Ok(StatusPayload {
        status: JobStatus::Running,
        steps: Some(steps(statuses)),
        ..Default::default()
    })
}

pub fn running_reported(progress: Option<f64>) -> Reply {
    Ok(StatusPayload {
        status: JobStatus::Running,
        progress,
        ..Default::default()
    })
}

pub fn sealed(results: Value) -> Reply {
    Ok(StatusPayload {
        status: JobStatus::Completed,
        steps: Some(steps([StepStatus::Completed; 6])),
        results: Some(results),
        ..Default::default()
    })
}

pub fn network_down() -> Reply {
    Err(TransportError::Network("connection refused".into()))
}

/// Let spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
