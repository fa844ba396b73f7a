use thiserror::Error;

/// A status fetch that never produced a usable payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("analysis service returned HTTP {0}")]
    Status(u16),
    #[error("could not decode analysis service response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Why an analysis ended without results.  This is what lands in
/// `AnalysisState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The job itself reported failure.
    #[error("{0}")]
    Job(String),
    /// The status endpoint stayed unreachable for too many polls in a row.
    #[error("status polling gave up after {attempts} consecutive failures: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

/// Failure to kick off a new analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("analysis service rejected the request: {0}")]
    Rejected(String),
    #[error("analysis service did not return an analysis id")]
    MissingId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AnalysisError::Transport {
            attempts: 5,
            source: TransportError::Status(503),
        };
        assert_eq!(
            err.to_string(),
            "status polling gave up after 5 consecutive failures: analysis service returned HTTP 503"
        );
        assert_eq!(AnalysisError::Job("no data".into()).to_string(), "no data");
        assert_eq!(
            StartError::from(TransportError::Network("refused".into())).to_string(),
            "request failed: refused"
        );
    }
}
