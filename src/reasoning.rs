use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest},
    LLMError,
};

/// Thin client over the reasoning service: free-text completions plus
/// schema-validated structured completions. Every evaluative component shares
/// one instance; the retry discipline lives with the callers.
#[derive(Clone)]
pub struct ReasoningClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ReasoningClient {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One free-text completion. Empty or whitespace-only replies count as
    /// failures so the retry loop treats them like any other transient error.
    pub async fn complete_text(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LLMError> {
        self.complete_chat(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .await
    }

    /// Free-text completion over an arbitrary message sequence, for callers
    /// that replay a full conversation history.
    pub async fn complete_chat(&self, messages: Vec<ChatMessage>) -> Result<String, LLMError> {
        let request = CompletionRequest::new(self.model.clone(), messages);

        let response = self.provider.complete(request).await?;
        let text = response.message.text().unwrap_or_default().trim().to_string();

        if text.is_empty() {
            return Err(LLMError::InvalidResponse("empty completion text".into()));
        }

        Ok(text)
    }

    /// One structured completion: declares the schema of `T` in the request,
    /// validates the reply against that same schema (Draft 7) and only then
    /// deserializes. Unparsable or schema-violating output is an error, never
    /// a value — evaluative fields are not built from unvalidated text.
    pub async fn complete_structured<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T, LLMError>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let schema = schemars::schema_for!(T);
        let schema_value = serde_json::to_value(&schema)?;

        let response_format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": T::schema_name(),
                "schema": schema_value,
            }
        });

        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
        )
        .with_response_format(response_format);

        let response = self.provider.complete(request).await?;
        let text = response.message.text().unwrap_or_default();
        let value = extract_json_value(text)?;

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&serde_json::to_value(&schema)?)
            .map_err(|e| LLMError::SchemaViolation(e.to_string()))?;

        if let Err(errors) = compiled.validate(&value) {
            let detail: Vec<String> = errors.take(5).map(|e| e.to_string()).collect();
            return Err(LLMError::SchemaViolation(detail.join("; ")));
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// Parses the reply as JSON, tolerating a fenced ```json block around it.
fn extract_json_value(text: &str) -> Result<Value, LLMError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LLMError::InvalidResponse("empty structured completion".into()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = extract_json_from_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            return Ok(value);
        }
    }

    Err(LLMError::InvalidResponse("structured completion was not valid JSON".into()))
}

fn extract_json_from_fenced_block(content: &str) -> Option<String> {
    let start = content.find("```json").or_else(|| content.find("```"))?;
    let remainder = &content[start..];
    let after_language = remainder.find('\n')?;
    let body = &remainder[after_language + 1..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::ReasoningClient;
    use crate::{providers::scripted::ScriptedProvider, LLMError};

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        accepted: bool,
        note: String,
    }

    fn client(responses: Vec<&str>) -> ReasoningClient {
        let provider = Arc::new(ScriptedProvider::new(
            responses.into_iter().map(String::from).collect(),
        ));
        ReasoningClient::new(provider, "scripted")
    }

    #[tokio::test]
    async fn parses_valid_structured_output() {
        let client = client(vec![r#"{"accepted": true, "note": "ok"}"#]);
        let verdict: Verdict = client.complete_structured("sys", "user").await.unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.note, "ok");
    }

    #[tokio::test]
    async fn parses_fenced_structured_output() {
        let client = client(vec!["```json\n{\"accepted\": false, \"note\": \"no\"}\n```"]);
        let verdict: Verdict = client.complete_structured("sys", "user").await.unwrap();
        assert!(!verdict.accepted);
    }

    #[tokio::test]
    async fn rejects_schema_violations() {
        let client = client(vec![r#"{"accepted": "definitely", "note": 3}"#]);
        let error = client
            .complete_structured::<Verdict>("sys", "user")
            .await
            .unwrap_err();
        assert!(matches!(error, LLMError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn rejects_non_json_output() {
        let client = client(vec!["I cannot answer in JSON."]);
        let error = client
            .complete_structured::<Verdict>("sys", "user")
            .await
            .unwrap_err();
        assert!(matches!(error, LLMError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_text_is_a_failure() {
        let client = client(vec!["   "]);
        let error = client.complete_text("sys", "user").await.unwrap_err();
        assert!(matches!(error, LLMError::InvalidResponse(_)));
    }
}
