use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Steps the job runner executes, in order.  The last one is the sealing
/// step: a job is only finished once it reports `completed`.
pub const ANALYSIS_STEPS: [&str; 6] = [
    COMPANY_INFO_STEP,
    "get_price_history",
    "get_news",
    "get_analyst_ratings",
    "get_social_media_sentiment",
    SEALING_STEP,
];

/// Step whose completion makes `company_data` available mid-job.
pub const COMPANY_INFO_STEP: &str = "get_company_information";

/// Synthetic final step that confirms the whole job completed.
pub const SEALING_STEP: &str = "complete_analysis";

/// Coarse job status reported by the runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Failed,
    /// Anything the runner sends that we don't recognise, or no status at all.
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[serde(alias = "not started")]
    NotStarted,
    #[serde(alias = "in progress")]
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

/// One entry of the runner's ordered step list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Older runner builds wrote `step_name` or `step`.
    #[serde(alias = "step_name", alias = "step")]
    pub name: String,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Body of `GET /analysis/{id}`.
///
/// Every field is optional and decoded leniently: a field with an
/// unexpected JSON shape is treated as absent rather than failing the
/// whole payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(
        rename = "currentStep",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_step: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_data: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusPayload {
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.as_deref()?.iter().find(|s| s.name == name)
    }

    pub fn step_completed(&self, name: &str) -> bool {
        self.step(name).map(StepRecord::is_completed).unwrap_or(false)
    }
}

/// Body of `POST /analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub ticker: String,
}

/// Reply to `POST /analyze`.
///
/// The runner answers `{analysisId}`; the web proxy wraps the same thing as
/// `{message, data: {analysisId}}`.  Failures carry `{error}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartResponse {
    #[serde(rename = "analysisId", default, deserialize_with = "identifier")]
    analysis_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    data: Option<Box<StartResponse>>,
    #[serde(default, deserialize_with = "error_message")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

impl StartResponse {
    pub fn analysis_id(&self) -> Option<&str> {
        self.analysis_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.analysis_id()))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Accepts a string, or renders any other non-null JSON as text, so a
/// structured error from the runner still reads as an error.
fn error_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Bool(false)) => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Ids are strings, but a numeric id is accepted verbatim.
fn identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_running_payload() {
        let json = r#"{
            "status": "running",
            "progress": 20,
            "currentStep": "get_news",
            "steps": [
                {"name": "get_company_information", "status": "completed"},
                {"name": "get_price_history", "status": "in_progress"},
                {"name": "complete_analysis", "status": "not_started"}
            ],
            "company_data": {"name": "Acme"}
        }"#;
        let payload: StatusPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.status, JobStatus::Running);
        assert_eq!(payload.progress, Some(20.0));
        assert_eq!(payload.current_step.as_deref(), Some("get_news"));
        assert_eq!(payload.steps.as_ref().map(Vec::len), Some(3));
        assert!(payload.step_completed(COMPANY_INFO_STEP));
        assert!(!payload.step_completed(SEALING_STEP));
        assert_eq!(payload.company_data.unwrap()["name"], "Acme");
    }

    #[test]
    fn test_decode_legacy_step_spellings() {
        let json = r#"{
            "status": "created",
            "steps": [
                {"step": "get_company_information", "status": "not started"},
                {"step_name": "complete_analysis", "status": "in_progress"}
            ]
        }"#;
        let payload: StatusPayload = serde_json::from_str(json).unwrap();
        let steps = payload.steps.unwrap();
        assert_eq!(steps[0], StepRecord::new(COMPANY_INFO_STEP, StepStatus::NotStarted));
        assert_eq!(steps[1], StepRecord::new(SEALING_STEP, StepStatus::InProgress));
    }

    #[test]
    fn test_malformed_fields_degrade_to_absent() {
        let json = r#"{
            "status": 7,
            "progress": "lots",
            "currentStep": ["x"],
            "steps": {"not": "a list"}
        }"#;
        let payload: StatusPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.status, JobStatus::Unknown);
        assert_eq!(payload.progress, None);
        assert_eq!(payload.current_step, None);
        assert_eq!(payload.steps, None);
    }

    #[test]
    fn test_unknown_status_strings() {
        let payload: StatusPayload = serde_json::from_str(r#"{"status": "paused"}"#).unwrap();
        assert_eq!(payload.status, JobStatus::Unknown);

        let payload: StatusPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.status, JobStatus::Unknown);

        let step: StepRecord =
            serde_json::from_str(r#"{"name": "get_news", "status": "skipped"}"#).unwrap();
        assert_eq!(step.status, StepStatus::Unknown);
    }

    #[test]
    fn test_error_field_shapes() {
        let payload: StatusPayload =
            serde_json::from_str(r#"{"status": "running", "error": ""}"#).unwrap();
        assert_eq!(payload.error, None);

        let payload: StatusPayload =
            serde_json::from_str(r#"{"error": {"code": 502}}"#).unwrap();
        assert_eq!(payload.error.as_deref(), Some(r#"{"code":502}"#));
    }

    #[test]
    fn test_start_response_shapes() {
        let direct: StartResponse = serde_json::from_str(r#"{"analysisId": "42"}"#).unwrap();
        assert_eq!(direct.analysis_id(), Some("42"));

        let wrapped: StartResponse = serde_json::from_str(
            r#"{"message": "Analysis started for ticker: ACME", "data": {"success": true, "analysisId": 1700000000000}}"#,
        )
        .unwrap();
        assert_eq!(wrapped.analysis_id(), Some("1700000000000"));

        let failed: StartResponse =
            serde_json::from_str(r#"{"error": "Ticker symbol is required"}"#).unwrap();
        assert_eq!(failed.analysis_id(), None);
        assert_eq!(failed.error.as_deref(), Some("Ticker symbol is required"));
    }

    #[test]
    fn test_step_order() {
        assert_eq!(ANALYSIS_STEPS.first(), Some(&COMPANY_INFO_STEP));
        assert_eq!(ANALYSIS_STEPS.last(), Some(&SEALING_STEP));
    }
}
