use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

/// Replays a fixed queue of responses in order. Used to drive deterministic
/// evaluation scenarios and tests without a live model.
pub struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let mut guard = self.responses.lock().unwrap();
        if guard.is_empty() {
            return Err(LLMError::Provider("no more scripted responses".to_string()));
        }
        let response = guard.remove(0);
        drop(guard);

        Ok(CompletionResponse {
            message: ChatMessage::assistant(response),
            usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
