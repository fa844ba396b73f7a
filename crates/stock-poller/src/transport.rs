//! HTTP access to the analysis service.

use async_trait::async_trait;
use reqwest::Url;
use stock_proto::config::ApiConfig;
use stock_proto::protocol::{StartRequest, StartResponse, StatusPayload};
use tracing::debug;

use crate::error::{StartError, TransportError};

/// What the poller needs from the analysis service.  Reading status must be
/// safe to retry.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// `POST /analyze`; returns the new analysis id.
    async fn start_analysis(&self, ticker: &str) -> Result<String, StartError>;

    /// `GET /analysis/{id}`.
    async fn fetch_status(&self, analysis_id: &str) -> Result<StatusPayload, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(client, &config.base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Network(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Network(format!(
                "invalid base url {}: cannot hold a path",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    async fn start_analysis(&self, ticker: &str) -> Result<String, StartError> {
        let url = self.endpoint(&["analyze"]);
        debug!(%url, ticker, "requesting analysis");

        let response = self
            .client
            .post(url)
            .json(&StartRequest {
                ticker: ticker.to_string(),
            })
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::from)?;
        // Error replies still carry a JSON `{error}` body worth surfacing.
        let reply = serde_json::from_str::<StartResponse>(&body).ok();

        if let Some(error) = reply.as_ref().and_then(|r| r.error.clone()) {
            return Err(StartError::Rejected(error));
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }
        let reply = reply.ok_or_else(|| {
            TransportError::Decode(format!("unexpected start response: {}", truncate(&body)))
        })?;
        reply
            .analysis_id()
            .map(str::to_string)
            .ok_or(StartError::MissingId)
    }

    async fn fetch_status(&self, analysis_id: &str) -> Result<StatusPayload, TransportError> {
        let url = self.endpoint(&["analysis", analysis_id]);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(response.json::<StatusPayload>().await?)
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(120) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::with_client(reqwest::Client::new(), base).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let t = transport("http://localhost:5173/api");
        assert_eq!(
            t.endpoint(&["analysis", "42"]).as_str(),
            "http://localhost:5173/api/analysis/42"
        );

        let t = transport("http://localhost:5173/api/");
        assert_eq!(
            t.endpoint(&["analyze"]).as_str(),
            "http://localhost:5173/api/analyze"
        );
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let t = transport("http://localhost:5173");
        assert_eq!(
            t.endpoint(&["analysis", "a/b c"]).as_str(),
            "http://localhost:5173/analysis/a%2Fb%20c"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(HttpTransport::with_client(reqwest::Client::new(), "not a url").is_err());
        assert!(HttpTransport::with_client(reqwest::Client::new(), "mailto:x@example.com").is_err());
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(500);
        assert_eq!(truncate(&body).len(), 120);
        assert_eq!(truncate("short"), "short");
    }
}
