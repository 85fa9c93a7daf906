use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::EvalError,
    reasoning::ReasoningClient,
    retry::RetryPolicy,
    scoring::StopReason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Classifier output for the continue/left/accepted decision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StopDecision {
    pub should_stop: bool,
    pub stop_reason: Option<StopReason>,
    pub confidence: Confidence,
    pub reasoning: String,
}

const STOP_SYSTEM_PROMPT: &str = r#"You are analyzing a doctor-patient dialogue to detect if it should terminate.

Analyze the patient's latest response and determine if:

1. **Patient Left (should stop)**
   - Explicit refusal: "I'm not doing this surgery", "I'm leaving", "I want a second opinion"
   - Strong negative sentiment: anger, frustration, distrust
   - Disengagement: "I don't want to talk about this anymore"
   - Clear rejection of treatment despite doctor's efforts

2. **Patient Accepted (should stop)**
   - Explicit acceptance: "I'll do the surgery", "Let's schedule it", "I agree to the treatment"
   - Strong positive commitment: "You've convinced me", "I'm ready"
   - Clear agreement to proceed with recommended treatment

3. **Should Continue (don't stop)**
   - Patient is still engaged and considering
   - Asking questions, expressing concerns, but not final decision
   - Uncertain but willing to continue dialogue

Be conservative: only stop if there's clear evidence of patient leaving OR accepting.
If patient is still engaged and considering, mark should_stop as false."#;

/// Two-stage stop check: a rule on the round count, then a conservative
/// reasoning-service classification. A missed decision is fatal, never a
/// silent "continue".
pub struct StopConditionDetector {
    reasoning: ReasoningClient,
    retry: RetryPolicy,
}

impl StopConditionDetector {
    pub fn new(reasoning: ReasoningClient, retry: RetryPolicy) -> Self {
        Self { reasoning, retry }
    }

    pub async fn should_stop(
        &self,
        round_number: u32,
        patient_message: &str,
        transcript: &str,
        max_rounds: u32,
    ) -> Result<(bool, Option<StopReason>), EvalError> {
        // Rule stage: the round budget is checked without a reasoning call.
        if round_number >= max_rounds {
            tracing::info!(round = round_number, max_rounds, "max rounds reached");
            return Ok((true, Some(StopReason::MaxRoundsReached)));
        }

        let user_prompt = format!(
            "Analyze this dialogue to determine if it should stop:\n\n\
             Round: {round_number} of {max_rounds}\n\n\
             === Patient's Latest Response ===\n{patient_message}\n\n\
             === Full Dialogue History ===\n{transcript}\n\n\
             Determine:\n\
             - should_stop: true or false\n\
             - stop_reason: \"patient_left\", \"patient_accepted\", or null\n\
             - confidence: \"high\", \"medium\", or \"low\"\n\
             - reasoning: explain your decision"
        );

        let decision: StopDecision = self
            .retry
            .run("stop detection", || {
                self.reasoning
                    .complete_structured::<StopDecision>(STOP_SYSTEM_PROMPT, &user_prompt)
            })
            .await
            .map_err(|source| EvalError::StopDetection {
                round: round_number,
                source,
            })?;

        tracing::info!(
            round = round_number,
            should_stop = decision.should_stop,
            reason = decision.stop_reason.map(|r| r.as_str()).unwrap_or("none"),
            confidence = ?decision.confidence,
            "stop decision"
        );
        tracing::debug!(reasoning = decision.reasoning, "stop decision rationale");

        // Only an explicit left/accepted verdict terminates. The classifier
        // has no authority over the round budget, and an unreasoned stop is
        // treated as ambiguity, which defaults to continue.
        match (decision.should_stop, decision.stop_reason) {
            (true, Some(reason @ (StopReason::PatientLeft | StopReason::PatientAccepted))) => {
                Ok((true, Some(reason)))
            }
            (true, other) => {
                tracing::warn!(
                    round = round_number,
                    reason = other.map(|r| r.as_str()).unwrap_or("none"),
                    "classifier stop verdict without a usable reason, continuing"
                );
                Ok((false, None))
            }
            (false, _) => Ok((false, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::StopConditionDetector;
    use crate::{
        providers::scripted::ScriptedProvider,
        reasoning::ReasoningClient,
        retry::RetryPolicy,
        scoring::StopReason,
    };

    fn detector(responses: Vec<&str>) -> (StopConditionDetector, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(
            responses.into_iter().map(String::from).collect(),
        ));
        let detector = StopConditionDetector::new(
            ReasoningClient::new(provider.clone(), "test"),
            RetryPolicy::new(5, Duration::from_millis(1)),
        );
        (detector, provider)
    }

    #[tokio::test]
    async fn round_budget_short_circuits_without_a_reasoning_call() {
        let (detector, provider) = detector(vec![]);

        let (stop, reason) = detector.should_stop(5, "patient msg", "transcript", 5).await.unwrap();

        assert!(stop);
        assert_eq!(reason, Some(StopReason::MaxRoundsReached));
        // No scripted response was consumed.
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn explicit_acceptance_stops() {
        let (detector, _) = detector(vec![
            r#"{"should_stop": true, "stop_reason": "patient_accepted",
                "confidence": "high", "reasoning": "patient agreed to schedule"}"#,
        ]);

        let (stop, reason) = detector.should_stop(2, "let's do it", "transcript", 5).await.unwrap();
        assert!(stop);
        assert_eq!(reason, Some(StopReason::PatientAccepted));
    }

    #[tokio::test]
    async fn ambiguous_engagement_continues() {
        let (detector, _) = detector(vec![
            r#"{"should_stop": false, "stop_reason": null,
                "confidence": "medium", "reasoning": "still asking questions"}"#,
        ]);

        let (stop, reason) = detector.should_stop(2, "but what about...", "transcript", 5).await.unwrap();
        assert!(!stop);
        assert_eq!(reason, None);
    }

    #[tokio::test]
    async fn classifier_can_never_emit_max_rounds_reached() {
        let (detector, _) = detector(vec![
            r#"{"should_stop": true, "stop_reason": "max_rounds_reached",
                "confidence": "low", "reasoning": "confused"}"#,
        ]);

        let (stop, reason) = detector.should_stop(2, "hmm", "transcript", 5).await.unwrap();
        assert!(!stop);
        assert_eq!(reason, None);
    }
}
