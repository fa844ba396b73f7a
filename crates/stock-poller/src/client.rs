use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::error::StartError;
use crate::scheduler::{PollOptions, PollScheduler};
use crate::state::{AnalysisState, AnalysisStore};
use crate::transport::AnalysisTransport;

/// Store, scheduler and transport wired together for the common
/// "start a job and watch it" flow.
#[derive(Clone)]
pub struct AnalysisClient {
    scheduler: PollScheduler,
    transport: Arc<dyn AnalysisTransport>,
    options: PollOptions,
}

impl std::fmt::Debug for AnalysisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisClient")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AnalysisClient {
    pub fn new(transport: Arc<dyn AnalysisTransport>, options: PollOptions) -> Self {
        let scheduler = PollScheduler::new(AnalysisStore::new(), Arc::clone(&transport));
        Self {
            scheduler,
            transport,
            options,
        }
    }

    pub fn with_clock(
        transport: Arc<dyn AnalysisTransport>,
        clock: Arc<dyn Clock>,
        options: PollOptions,
    ) -> Self {
        let scheduler =
            PollScheduler::with_clock(AnalysisStore::new(), Arc::clone(&transport), clock);
        Self {
            scheduler,
            transport,
            options,
        }
    }

    pub fn store(&self) -> &AnalysisStore {
        self.scheduler.store()
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Ask the service to analyse `ticker`, then track the new job.
    ///
    /// If the request fails the store is left untouched.
    pub async fn analyze(&self, ticker: &str) -> Result<String, StartError> {
        let analysis_id = self.transport.start_analysis(ticker).await?;
        info!(ticker, analysis_id = analysis_id.as_str(), "analysis requested");
        self.attach(&analysis_id);
        Ok(analysis_id)
    }

    /// Track an analysis that was started elsewhere.
    pub fn attach(&self, analysis_id: &str) {
        self.store().start_analysis(analysis_id);
        self.scheduler.start_polling(analysis_id, self.options);
    }

    /// Wait until no poll is pending and return the final snapshot.
    pub async fn settled(&self) -> AnalysisState {
        let mut rx = self.store().subscribe();
        // The store owns the sender, so the channel cannot close under us.
        let _ = rx.wait_for(|state| !state.is_polling()).await;
        let state = rx.borrow().clone();
        state
    }

    pub fn reset(&self) {
        self.store().reset();
    }
}
