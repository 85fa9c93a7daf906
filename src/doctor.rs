use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::LLMError;

/// The counterpart agent under evaluation. No retry or backoff at this
/// boundary: the doctor either answers or the session fails loud.
#[async_trait]
pub trait DoctorEndpoint: Send + Sync {
    /// Sends the doctor-facing context and returns the doctor's reply.
    /// `new_conversation` must be true on the first call of a session.
    async fn send(&self, message: &str, new_conversation: bool) -> Result<String, LLMError>;

    /// Opaque address used in session records.
    fn url(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct DoctorRequest<'a> {
    message: &'a str,
    new_conversation: bool,
}

#[derive(Debug, Deserialize)]
struct DoctorReply {
    reply: String,
}

pub struct HttpDoctorEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpDoctorEndpoint {
    pub fn new(url: impl Into<String>) -> Result<Self, LLMError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DoctorEndpoint for HttpDoctorEndpoint {
    async fn send(&self, message: &str, new_conversation: bool) -> Result<String, LLMError> {
        let response = self
            .client
            .post(&self.url)
            .json(&DoctorRequest {
                message,
                new_conversation,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            return Err(LLMError::Provider(format!(
                "doctor endpoint returned {status}: {text}"
            )));
        }

        let reply: DoctorReply = response.json().await?;
        if reply.reply.trim().is_empty() {
            return Err(LLMError::InvalidResponse("doctor endpoint returned empty reply".into()));
        }

        Ok(reply.reply)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
