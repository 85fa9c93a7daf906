use thiserror::Error;

use crate::{persona::PersonaError, retry::RetryError};

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("structured output violated schema: {0}")]
    SchemaViolation(String),
}

/// Failure taxonomy for the evaluation pipeline. Evaluative stages carry the
/// stage name and the exhausted-retry cause; scores are never fabricated to
/// paper over one.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid evaluation request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Persona(#[from] PersonaError),

    #[error("doctor endpoint failure: {0}")]
    Doctor(#[source] LLMError),

    #[error("round scoring failed for round {round}: {source}")]
    Scoring {
        round: u32,
        #[source]
        source: RetryError,
    },

    #[error("stop detection failed for round {round}: {source}")]
    StopDetection {
        round: u32,
        #[source]
        source: RetryError,
    },

    #[error("report generation failed for session {session_id}: {source}")]
    Report {
        session_id: String,
        #[source]
        source: RetryError,
    },
}
