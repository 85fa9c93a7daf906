use crate::{
    history::ChatHistory,
    reasoning::ReasoningClient,
    retry::RetryPolicy,
    types::ChatMessage,
};

/// Generic in-character filler used when reply generation is exhausted. The
/// patient side is non-evaluative, so conversational continuity wins over
/// strict correctness.
const FALLBACK_LINES: [&str; 4] = [
    "I'm sorry, doctor... I'm feeling a bit overwhelmed. Could you give me a moment?",
    "Sorry, I lost my train of thought there. Could you say that again?",
    "I... I'm not sure what to say just yet. I need a second to take this in.",
    "My head is spinning a little. Can we slow down?",
];

/// Simulates the patient side of the dialogue. Holds the persona's private
/// system prompt and an append-only memory that is replayed in full on every
/// call; the doctor speaks as the user role, the patient as the assistant.
pub struct PatientSimulator {
    reasoning: ReasoningClient,
    system_prompt: String,
    retry: RetryPolicy,
    history: ChatHistory,
}

impl PatientSimulator {
    pub fn new(reasoning: ReasoningClient, system_prompt: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            reasoning,
            system_prompt: system_prompt.into(),
            retry,
            history: ChatHistory::new(),
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Produces the patient's reply to one doctor message. Never fails: after
    /// the retry budget is spent, a fixed fallback line is substituted.
    /// Success or fallback, exactly one doctor entry and one patient entry are
    /// appended to memory, in that order.
    pub async fn respond(&mut self, doctor_message: &str) -> String {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.messages().iter().cloned());
        messages.push(ChatMessage::user(doctor_message));

        let reasoning = &self.reasoning;
        let reply = match self
            .retry
            .run("patient reply", || reasoning.complete_chat(messages.clone()))
            .await
        {
            Ok(text) => text,
            Err(error) => {
                let line = self.fallback_line();
                tracing::warn!(%error, fallback = line, "patient reply exhausted retries, using fallback");
                line.to_string()
            }
        };

        self.history.push_user(doctor_message);
        self.history.push_assistant(reply.clone());
        reply
    }

    /// Deterministic pick: completed patient turns so far, modulo the set
    /// size, so replays are reproducible.
    fn fallback_line(&self) -> &'static str {
        let completed = self.history.len() / 2;
        FALLBACK_LINES[completed % FALLBACK_LINES.len()]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{PatientSimulator, FALLBACK_LINES};
    use crate::{
        providers::LLMProvider,
        reasoning::ReasoningClient,
        retry::RetryPolicy,
        types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole},
        LLMError,
    };

    struct ReplyProvider {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for ReplyProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            let content = self.responses.lock().unwrap().remove(0);
            Ok(CompletionResponse {
                message: ChatMessage::assistant(content),
                usage: None,
            })
        }

        fn name(&self) -> &'static str {
            "reply"
        }
    }

    struct FailingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LLMProvider for FailingProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LLMError::Provider("unavailable".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn appends_one_pair_per_call() {
        let provider = Arc::new(ReplyProvider {
            responses: Mutex::new(vec!["I'm scared of surgery.".to_string()]),
        });
        let mut patient = PatientSimulator::new(
            ReasoningClient::new(provider, "test"),
            "You are a patient.",
            policy(),
        );

        let reply = patient.respond("Hello, how are you feeling?").await;
        assert_eq!(reply, "I'm scared of surgery.");

        let messages = patient.history().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].text(), Some("Hello, how are you feeling?"));
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn falls_back_after_exhausting_retries() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
        });
        let mut patient = PatientSimulator::new(
            ReasoningClient::new(provider.clone(), "test"),
            "You are a patient.",
            policy(),
        );

        let reply = patient.respond("Shall we talk about the procedure?").await;

        assert!(!reply.trim().is_empty());
        assert!(FALLBACK_LINES.contains(&reply.as_str()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        // The fallback still appends a full doctor+patient pair.
        assert_eq!(patient.history().len(), 2);
    }

    #[tokio::test]
    async fn empty_reply_counts_as_a_failed_attempt() {
        let provider = Arc::new(ReplyProvider {
            responses: Mutex::new(vec![
                "   ".to_string(),
                "Fine, I suppose.".to_string(),
            ]),
        });
        let mut patient = PatientSimulator::new(
            ReasoningClient::new(provider, "test"),
            "You are a patient.",
            policy(),
        );

        let reply = patient.respond("How are you?").await;
        assert_eq!(reply, "Fine, I suppose.");
    }
}
