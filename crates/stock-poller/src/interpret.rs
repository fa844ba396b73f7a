//! Turns one raw status payload into a decision for the scheduler.

use serde_json::Value;
use stock_proto::protocol::{
    JobStatus, StatusPayload, StepRecord, StepStatus, COMPANY_INFO_STEP, SEALING_STEP,
};

const DEFAULT_FAILURE: &str = "Analysis failed";
const DEFAULT_LABEL: &str = "Processing...";

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Job still going; keep polling.
    Continue,
    /// Job finished and sealed; carries the results (JSON null if none were sent).
    Success(Value),
    /// Job gave up; carries the message to surface.
    Failure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub outcome: Outcome,
    /// 0..=100; `None` leaves the current progress alone.
    pub progress: Option<u8>,
    /// `None` leaves the current label alone.
    pub step_label: Option<String>,
    /// Early company details, present once the company step has completed.
    pub company_data: Option<Value>,
}

impl Interpretation {
    fn pending() -> Self {
        Self {
            outcome: Outcome::Continue,
            progress: None,
            step_label: None,
            company_data: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure(message.into()),
            ..Self::pending()
        }
    }

    fn success(results: Value) -> Self {
        Self {
            outcome: Outcome::Success(results),
            progress: Some(100),
            ..Self::pending()
        }
    }
}

/// Decide what a status payload means.
///
/// An explicit `error` always wins.  A `completed` status only counts once
/// the `complete_analysis` step itself reports completed; until then the
/// payload is treated like any other non-running status.
pub fn interpret(payload: &StatusPayload) -> Interpretation {
    if let Some(error) = payload.error.as_deref() {
        return Interpretation::failure(error);
    }

    match payload.status {
        JobStatus::Failed => Interpretation::failure(DEFAULT_FAILURE),
        JobStatus::Completed if payload.step_completed(SEALING_STEP) => {
            Interpretation::success(payload.results.clone().unwrap_or(Value::Null))
        }
        JobStatus::Running => running(payload),
        _ => Interpretation::pending(),
    }
}

fn running(payload: &StatusPayload) -> Interpretation {
    let fallback_label = || {
        payload
            .current_step
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LABEL)
            .to_string()
    };

    let steps = match payload.steps.as_deref() {
        Some(steps) if !steps.is_empty() => steps,
        _ => {
            return Interpretation {
                progress: Some(reported_progress(payload.progress)),
                step_label: Some(fallback_label()),
                ..Interpretation::pending()
            }
        }
    };

    let label = find_step(steps, StepStatus::InProgress)
        .map(|s| format!("Processing: {}", humanize(&s.name)))
        .or_else(|| {
            find_step(steps, StepStatus::NotStarted)
                .map(|s| format!("Preparing: {}", humanize(&s.name)))
        })
        .unwrap_or_else(fallback_label);

    let company_data = if payload.step_completed(COMPANY_INFO_STEP) {
        payload.company_data.clone()
    } else {
        None
    };

    Interpretation {
        progress: Some(step_progress(steps)),
        step_label: Some(label),
        company_data,
        ..Interpretation::pending()
    }
}

/// floor(100 * completed / total)
pub fn step_progress(steps: &[StepRecord]) -> u8 {
    if steps.is_empty() {
        return 0;
    }
    let completed = steps.iter().filter(|s| s.is_completed()).count();
    (completed * 100 / steps.len()) as u8
}

fn reported_progress(progress: Option<f64>) -> u8 {
    match progress {
        Some(p) if p.is_finite() => p.floor().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

fn find_step(steps: &[StepRecord], status: StepStatus) -> Option<&StepRecord> {
    steps.iter().find(|s| s.status == status)
}

fn humanize(step_name: &str) -> String {
    step_name.replace(|c: char| c == '_' || c == '-', " ")
}
