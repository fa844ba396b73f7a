use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::AnalysisError;
use crate::scheduler::SchedulerPhase;

pub const STARTING_LABEL: &str = "Starting analysis...";
pub const COMPLETE_LABEL: &str = "Analysis complete";
pub const FAILED_LABEL: &str = "Analysis failed";

/// Identifies one poll chain.  A chain may only touch the store while the
/// store still carries its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollHandle(u64);

impl PollHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Everything a consumer needs to render an analysis.  `rev` is bumped on
/// every published change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisState {
    pub rev: u64,
    pub is_analyzing: bool,
    /// 0..=100
    pub progress: u8,
    pub current_step: String,
    pub error: Option<AnalysisError>,
    pub results: Option<Value>,
    pub analysis_id: Option<String>,
    pub poll_handle: Option<PollHandle>,
    pub company_data: Option<Value>,
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.results.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_handle.is_some()
    }

    /// Equal apart from the revision counter.
    fn same_content(&self, other: &Self) -> bool {
        AnalysisState { rev: other.rev, ..self.clone() } == *other
    }

    fn started(&self, analysis_id: &str) -> Self {
        AnalysisState {
            rev: self.rev,
            is_analyzing: true,
            progress: 0,
            current_step: STARTING_LABEL.to_string(),
            error: None,
            results: None,
            analysis_id: Some(analysis_id.to_string()),
            poll_handle: None,
            company_data: None,
        }
    }

    pub(crate) fn progressed(&self, progress: u8, step: Option<String>) -> Self {
        AnalysisState {
            progress: progress.min(100),
            current_step: step.unwrap_or_else(|| self.current_step.clone()),
            ..self.clone()
        }
    }

    pub(crate) fn completed(&self, results: Value) -> Self {
        AnalysisState {
            is_analyzing: false,
            progress: 100,
            current_step: COMPLETE_LABEL.to_string(),
            error: None,
            results: Some(results),
            ..self.clone()
        }
    }

    pub(crate) fn failed(&self, error: AnalysisError) -> Self {
        AnalysisState {
            is_analyzing: false,
            current_step: FAILED_LABEL.to_string(),
            error: Some(error),
            results: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_company_data(&self, data: Value) -> Self {
        AnalysisState {
            company_data: Some(data),
            ..self.clone()
        }
    }

    fn without_poll(&self) -> Self {
        AnalysisState {
            poll_handle: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
struct PollSlot {
    active: Option<ActivePoll>,
    phase: SchedulerPhase,
}

#[derive(Debug)]
struct ActivePoll {
    handle: PollHandle,
    abort: Option<AbortHandle>,
}

#[derive(Debug)]
struct StoreInner {
    tx: watch::Sender<AnalysisState>,
    poll: Mutex<PollSlot>,
    next_handle: AtomicU64,
}

/// Single source of truth for one analysis session.
///
/// Cloning is cheap and every clone shares the same state.  Mutations are
/// synchronous whole-state replacements; subscribers receive the new
/// snapshot through a `watch` channel.
///
/// Lock order: the watch channel and the poll slot are never held together.
#[derive(Debug, Clone)]
pub struct AnalysisStore {
    inner: Arc<StoreInner>,
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AnalysisState::default());
        Self {
            inner: Arc::new(StoreInner {
                tx,
                poll: Mutex::new(PollSlot::default()),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisState> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> AnalysisState {
        self.inner.tx.borrow().clone()
    }

    /// Begin tracking `analysis_id`, abandoning whatever was tracked before.
    /// The old poll handle is dropped in the same write, so subscribers see
    /// one change.
    pub fn start_analysis(&self, analysis_id: &str) {
        self.replace(|s| s.started(analysis_id));
        self.retire_poll(SchedulerPhase::Stopped);
        debug!(analysis_id, "analysis started");
    }

    pub fn update_progress(&self, progress: u8, step: impl Into<String>) {
        let step = step.into();
        self.replace(|s| s.progressed(progress, Some(step)));
    }

    pub fn complete(&self, results: Value) {
        self.replace(|s| s.completed(results));
    }

    pub fn fail(&self, error: AnalysisError) {
        self.replace(|s| s.failed(error));
    }

    pub fn update_company_data(&self, data: Value) {
        self.replace(|s| s.with_company_data(data));
    }

    /// Cancel any pending poll.  Calling it with nothing scheduled is a no-op.
    pub fn stop_polling(&self) {
        self.cancel_poll(SchedulerPhase::Stopped);
    }

    /// Cancel any pending poll and go back to the initial empty state.
    pub fn reset(&self) {
        self.cancel_poll(SchedulerPhase::Idle);
        self.inner.tx.send_if_modified(|state| {
            let initial = AnalysisState::default();
            if state.same_content(&initial) {
                return false;
            }
            *state = AnalysisState {
                rev: state.rev + 1,
                ..initial
            };
            true
        });
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.slot().phase
    }

    fn replace(&self, next: impl FnOnce(&AnalysisState) -> AnalysisState) {
        self.inner.tx.send_modify(|state| {
            let rev = state.rev + 1;
            *state = AnalysisState { rev, ..next(state) };
        });
    }

    fn slot(&self) -> MutexGuard<'_, PollSlot> {
        // A panic while holding the slot leaves plain data behind; keep going.
        self.inner
            .poll
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clears the handle first so a chain caught between awaits fails its
    /// liveness check, then aborts the task.
    fn cancel_poll(&self, phase: SchedulerPhase) {
        self.inner.tx.send_if_modified(|state| {
            if state.poll_handle.is_none() {
                return false;
            }
            *state = AnalysisState {
                rev: state.rev + 1,
                ..state.without_poll()
            };
            true
        });
        self.retire_poll(phase);
    }

    /// Forget the active chain and abort its task.  The published handle
    /// must already be gone.
    fn retire_poll(&self, phase: SchedulerPhase) {
        let cancelled = {
            let mut slot = self.slot();
            let cancelled = slot.active.take();
            if cancelled.is_some() || phase == SchedulerPhase::Idle {
                slot.phase = phase;
            }
            cancelled
        };

        if let Some(poll) = cancelled {
            debug!(handle = poll.handle.id(), "poll chain cancelled");
            if let Some(abort) = poll.abort {
                abort.abort();
            }
        }
    }

    // ── Poll chain bookkeeping (used by the scheduler) ────────────────────────

    /// Replace any existing chain with a fresh one and publish its handle.
    pub(crate) fn begin_poll(&self) -> PollHandle {
        let handle = PollHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));

        self.inner.tx.send_modify(|state| {
            *state = AnalysisState {
                rev: state.rev + 1,
                poll_handle: Some(handle),
                ..state.clone()
            };
        });

        let previous = {
            let mut slot = self.slot();
            slot.phase = SchedulerPhase::Scheduled;
            slot.active.replace(ActivePoll {
                handle,
                abort: None,
            })
        };
        if let Some(abort) = previous.and_then(|p| p.abort) {
            abort.abort();
        }
        handle
    }

    /// Remember the task driving `handle` so cancellation can abort it.  If
    /// the chain was cancelled before we got here, abort straight away.
    pub(crate) fn attach_task(&self, handle: PollHandle, abort: AbortHandle) {
        let mut slot = self.slot();
        match slot.active.as_mut() {
            Some(active) if active.handle == handle => active.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    pub(crate) fn is_current(&self, handle: PollHandle) -> bool {
        self.inner.tx.borrow().poll_handle == Some(handle)
    }

    pub(crate) fn set_phase(&self, handle: PollHandle, phase: SchedulerPhase) {
        let mut slot = self.slot();
        if slot.active.as_ref().map(|a| a.handle) == Some(handle) {
            slot.phase = phase;
        }
    }

    /// Apply `next` only while `handle` is still the live chain.  The check
    /// and the write happen under the same lock.
    pub(crate) fn replace_if_current(
        &self,
        handle: PollHandle,
        next: impl FnOnce(&AnalysisState) -> AnalysisState,
    ) -> bool {
        self.inner.tx.send_if_modified(|state| {
            if state.poll_handle != Some(handle) {
                return false;
            }
            let rev = state.rev + 1;
            *state = AnalysisState { rev, ..next(state) };
            true
        })
    }

    /// Apply a terminal transition and retire the chain in one step.
    pub(crate) fn finish_poll(
        &self,
        handle: PollHandle,
        next: impl FnOnce(&AnalysisState) -> AnalysisState,
    ) -> bool {
        let applied = self.replace_if_current(handle, |s| next(s).without_poll());
        if applied {
            let mut slot = self.slot();
            if slot.active.as_ref().map(|a| a.handle) == Some(handle) {
                slot.active = None;
                slot.phase = SchedulerPhase::Stopped;
            }
        }
        applied
    }
}
