//! Client-side engine for watching a stock analysis job.
//!
//! [`AnalysisStore`] holds the single observable [`AnalysisState`].
//! [`PollScheduler`] repeatedly fetches the job status through an
//! [`AnalysisTransport`], runs each payload through [`interpret`], and
//! feeds the result back into the store, pacing itself with a [`Pacer`].

pub mod client;
pub mod clock;
pub mod error;
pub mod interpret;
pub mod pacing;
pub mod scheduler;
pub mod state;
pub mod transport;

pub use client::AnalysisClient;
pub use clock::{Clock, TokioClock};
pub use error::{AnalysisError, StartError, TransportError};
pub use interpret::{interpret, Interpretation, Outcome};
pub use pacing::{Backoff, Pacer};
pub use scheduler::{PollOptions, PollScheduler, SchedulerPhase};
pub use state::{AnalysisState, AnalysisStore, PollHandle};
pub use transport::{AnalysisTransport, HttpTransport};
