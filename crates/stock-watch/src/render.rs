//! Plain-text rendering of analysis snapshots.

use serde_json::Value;
use stock_poller::AnalysisState;

const BAR_WIDTH: usize = 20;

/// Lines worth printing for the move from `prev` to `next`.
pub fn describe(prev: Option<&AnalysisState>, next: &AnalysisState) -> Vec<String> {
    let mut lines = Vec::new();

    let progress_moved = prev
        .map(|p| p.progress != next.progress || p.current_step != next.current_step)
        .unwrap_or(true);
    if progress_moved && !next.current_step.is_empty() {
        lines.push(format!(
            "{} {:>3}%  {}",
            bar(next.progress),
            next.progress,
            next.current_step
        ));
    }

    if let Some(company) = &next.company_data {
        let first_seen = prev.and_then(|p| p.company_data.as_ref()) != Some(company);
        if first_seen {
            lines.push(format!("Company: {}", company_label(company)));
        }
    }

    lines
}

pub fn bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn company_label(company: &Value) -> String {
    let field = |key: &str| company.get(key).and_then(Value::as_str);
    match (field("name"), field("ticker").or_else(|| field("symbol"))) {
        (Some(name), Some(ticker)) => format!("{} ({})", name, ticker),
        (Some(name), None) => name.to_string(),
        _ => company.to_string(),
    }
}

/// Results are usually a prose report; anything else is pretty-printed JSON.
pub fn results(results: &Value) -> String {
    match results {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
