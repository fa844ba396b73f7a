//! The poll loop.
//!
//! A chain is one spawned task that alternates between sleeping and
//! fetching:
//!
//! ```text
//!   Idle ── start_polling ──► Scheduled ──(delay)──► InFlight
//!                                 ▲                     │
//!                                 └──── continue ───────┤
//!                                                       ▼
//!              stop_polling / reset / terminal ──► Stopped
//! ```
//!
//! Only one fetch per chain is ever outstanding, and a chain stops touching
//! the store as soon as its [`PollHandle`] is no longer the live one.

use std::sync::Arc;
use std::time::Duration;

use stock_proto::config::PollingConfig;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::AnalysisError;
use crate::interpret::{interpret, Outcome};
use crate::pacing::{Backoff, Pacer};
use crate::state::{AnalysisStore, PollHandle};
use crate::transport::AnalysisTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    /// Nothing has been scheduled since the store was created or reset.
    #[default]
    Idle,
    /// Waiting for the next fire.
    Scheduled,
    /// A status request is outstanding.
    InFlight,
    /// The last chain was cancelled or reached a terminal outcome.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        PollingConfig::default().into()
    }
}

impl From<&PollingConfig> for PollOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

impl From<PollingConfig> for PollOptions {
    fn from(config: PollingConfig) -> Self {
        Self::from(&config)
    }
}

/// Drives status polling for the analysis tracked by an [`AnalysisStore`].
#[derive(Clone)]
pub struct PollScheduler {
    store: AnalysisStore,
    transport: Arc<dyn AnalysisTransport>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    pub fn new(store: AnalysisStore, transport: Arc<dyn AnalysisTransport>) -> Self {
        Self::with_clock(store, transport, Arc::new(TokioClock))
    }

    pub fn with_clock(
        store: AnalysisStore,
        transport: Arc<dyn AnalysisTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
        }
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.store.phase()
    }

    /// Start a new chain for `analysis_id`, replacing any chain already
    /// running.  The first fetch happens after `options.initial_delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_polling(&self, analysis_id: &str, options: PollOptions) -> PollHandle {
        let handle = self.store.begin_poll();
        info!(
            analysis_id,
            handle = handle.id(),
            initial_ms = options.initial_delay.as_millis() as u64,
            max_ms = options.max_delay.as_millis() as u64,
            "polling started"
        );

        let chain = PollChain {
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            handle,
            analysis_id: analysis_id.to_string(),
            pacer: Pacer::new(
                options.initial_delay,
                options.max_delay,
                options.max_consecutive_errors,
            ),
        };
        let task = tokio::spawn(chain.run());
        self.store.attach_task(handle, task.abort_handle());
        handle
    }

    /// Cancel the pending fire, if any.  Safe to call repeatedly.
    pub fn stop_polling(&self) {
        self.store.stop_polling();
    }
}

struct PollChain {
    store: AnalysisStore,
    transport: Arc<dyn AnalysisTransport>,
    clock: Arc<dyn Clock>,
    handle: PollHandle,
    analysis_id: String,
    pacer: Pacer,
}

impl PollChain {
    async fn run(mut self) {
        loop {
            self.store.set_phase(self.handle, SchedulerPhase::Scheduled);
            self.clock.sleep(self.pacer.delay()).await;

            if !self.store.is_current(self.handle) {
                debug!(handle = self.handle.id(), "poll chain superseded before fetch");
                return;
            }
            self.store.set_phase(self.handle, SchedulerPhase::InFlight);

            if !self.poll_once().await {
                return;
            }
        }
    }

    /// One fetch-and-apply cycle.  Returns whether to schedule another.
    async fn poll_once(&mut self) -> bool {
        let analysis_id = self.analysis_id.as_str();
        debug!(analysis_id, delay_ms = self.pacer.delay().as_millis() as u64, "polling status");

        let payload = match self.transport.fetch_status(analysis_id).await {
            Ok(payload) => payload,
            Err(err) => {
                return match self.pacer.on_transport_error() {
                    Backoff::Retry(delay) => {
                        warn!(
                            analysis_id,
                            attempt = self.pacer.consecutive_errors(),
                            retry_in_ms = delay.as_millis() as u64,
                            "status poll failed: {}",
                            err
                        );
                        self.store.is_current(self.handle)
                    }
                    Backoff::GiveUp { attempts } => {
                        error!(analysis_id, attempts, "giving up on status polling: {}", err);
                        let error = AnalysisError::Transport {
                            attempts,
                            source: err,
                        };
                        self.store.finish_poll(self.handle, |s| s.failed(error));
                        false
                    }
                };
            }
        };
        self.pacer.on_response();

        let interpretation = interpret(&payload);
        match interpretation.outcome {
            Outcome::Success(results) => {
                info!(analysis_id, "analysis complete");
                self.store.finish_poll(self.handle, |s| s.completed(results));
                false
            }
            Outcome::Failure(message) => {
                error!(analysis_id, "analysis failed: {}", message);
                self.store
                    .finish_poll(self.handle, |s| s.failed(AnalysisError::Job(message)));
                false
            }
            Outcome::Continue => {
                let progress = interpretation.progress;
                let label = interpretation.step_label;
                let company_data = interpretation.company_data;
                let applied = self.store.replace_if_current(self.handle, |s| {
                    let s = match company_data {
                        Some(data) if s.company_data.as_ref() != Some(&data) => {
                            s.with_company_data(data)
                        }
                        _ => s.clone(),
                    };
                    s.progressed(progress.unwrap_or(s.progress), label)
                });
                if !applied {
                    debug!(analysis_id, "poll chain cancelled while request was in flight");
                    return false;
                }

                let next = self.pacer.on_progress(payload.progress);
                debug!(analysis_id, ?progress, next_ms = next.as_millis() as u64, "analysis running");
                true
            }
        }
    }
}
