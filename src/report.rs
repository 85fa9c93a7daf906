use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::EvalError,
    reasoning::ReasoningClient,
    retry::RetryPolicy,
    scoring::{RoundEvaluation, StopReason},
};

/// Qualitative half of the final report, produced by the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QualitativeAnalysis {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub key_moments: Vec<String>,
    pub improvement_recommendations: Vec<String>,
    pub alternative_approaches: Vec<String>,
    pub evaluation_summary: String,
}

/// Per-session performance report: aggregated scores plus qualitative
/// analysis of the doctor's conduct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub session_id: String,
    pub final_outcome: StopReason,
    pub total_rounds: u32,
    pub round_scores: Vec<RoundEvaluation>,
    pub overall_empathy: f64,
    pub overall_persuasion: f64,
    pub overall_safety: f64,
    /// Weighted 0-100 aggregate: empathy 30%, persuasion 40%, safety 30%.
    pub aggregate_score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub key_moments: Vec<String>,
    pub improvement_recommendations: Vec<String>,
    pub alternative_approaches: Vec<String>,
    pub evaluation_summary: String,
}

const REPORT_SYSTEM_PROMPT: &str = r#"You are an expert medical dialogue evaluator providing actionable feedback.

Analyze the doctor's performance and provide:

1. **Strengths (3-5 specific points)**
   - What did the doctor do well?
   - Effective communication techniques used
   - Successful persuasion strategies
   - Strong empathy moments

2. **Weaknesses (3-5 specific points)**
   - What could be improved?
   - Missed opportunities
   - Communication gaps
   - Areas where patient concerns weren't addressed

3. **Key Moments (2-4 critical turns)**
   - Breakthrough moments (positive or negative)
   - Turning points in the dialogue
   - Specific rounds that had major impact
   - Format: "Round X: [what happened and why it mattered]"

4. **Improvement Recommendations (3-5 specific, actionable suggestions)**
   - Concrete advice for future dialogues
   - Techniques to try
   - Areas to focus on
   - Be specific and actionable

5. **Alternative Approaches (2-3 different strategies)**
   - What else could the doctor have tried?
   - Different persuasion angles
   - Alternative ways to address concerns

6. **Evaluation Summary (2-3 paragraphs)**
   - Overall assessment of performance
   - Context: how outcome relates to performance
   - Balanced view of strengths and areas for growth

Be specific, evidence-based, and constructive. Reference specific rounds and moments."#;

/// Builds the end-of-session report. Score aggregation is pure arithmetic;
/// only the qualitative analysis goes through the reasoning service, and a
/// failure there is fatal because report content cannot be invented.
pub struct ReportGenerator {
    reasoning: ReasoningClient,
    retry: RetryPolicy,
}

impl ReportGenerator {
    pub fn new(reasoning: ReasoningClient, retry: RetryPolicy) -> Self {
        Self { reasoning, retry }
    }

    pub async fn generate_report(
        &self,
        session_id: &str,
        final_outcome: StopReason,
        round_evaluations: &[RoundEvaluation],
        dialogue_transcript: &str,
    ) -> Result<PerformanceReport, EvalError> {
        let total_rounds = round_evaluations.len() as u32;
        let n = round_evaluations.len().max(1) as f64;
        let overall_empathy =
            round_evaluations.iter().map(|r| r.empathy_score).sum::<f64>() / n;
        let overall_persuasion =
            round_evaluations.iter().map(|r| r.persuasion_score).sum::<f64>() / n;
        let overall_safety =
            round_evaluations.iter().map(|r| r.safety_score).sum::<f64>() / n;

        // Weighting: empathy 30%, persuasion 40%, safety 30% on a 0-100 scale.
        let aggregate_score =
            overall_empathy * 3.0 + overall_persuasion * 4.0 + overall_safety * 3.0;

        tracing::info!(
            session_id,
            empathy = format!("{overall_empathy:.2}"),
            persuasion = format!("{overall_persuasion:.2}"),
            safety = format!("{overall_safety:.2}"),
            aggregate = format!("{aggregate_score:.2}"),
            "aggregated session scores"
        );

        let qualitative = self
            .qualitative_analysis(
                final_outcome,
                round_evaluations,
                dialogue_transcript,
                overall_empathy,
                overall_persuasion,
                overall_safety,
            )
            .await
            .map_err(|source| EvalError::Report {
                session_id: session_id.to_string(),
                source,
            })?;

        Ok(PerformanceReport {
            session_id: session_id.to_string(),
            final_outcome,
            total_rounds,
            round_scores: round_evaluations.to_vec(),
            overall_empathy,
            overall_persuasion,
            overall_safety,
            aggregate_score,
            strengths: qualitative.strengths,
            weaknesses: qualitative.weaknesses,
            key_moments: qualitative.key_moments,
            improvement_recommendations: qualitative.improvement_recommendations,
            alternative_approaches: qualitative.alternative_approaches,
            evaluation_summary: qualitative.evaluation_summary,
        })
    }

    async fn qualitative_analysis(
        &self,
        final_outcome: StopReason,
        round_evaluations: &[RoundEvaluation],
        dialogue_transcript: &str,
        overall_empathy: f64,
        overall_persuasion: f64,
        overall_safety: f64,
    ) -> Result<QualitativeAnalysis, crate::retry::RetryError> {
        let mut round_summary = String::new();
        for eval in round_evaluations {
            round_summary.push_str(&format!(
                "\nRound {}: Empathy={:.1}, Persuasion={:.1}, Safety={:.1} | Patient state: {}",
                eval.round_number,
                eval.empathy_score,
                eval.persuasion_score,
                eval.safety_score,
                eval.patient_state_change,
            ));
        }

        let user_prompt = format!(
            "Analyze this medical dialogue evaluation:\n\n\
             === Final Outcome ===\n{}\n\n\
             === Overall Scores ===\n\
             Empathy: {overall_empathy:.2}/10\n\
             Persuasion: {overall_persuasion:.2}/10\n\
             Safety: {overall_safety:.2}/10\n\n\
             === Per-Round Scores ===\n{round_summary}\n\n\
             === Full Dialogue Transcript ===\n{dialogue_transcript}\n\n\
             Provide comprehensive qualitative analysis with actionable insights.",
            final_outcome.as_str(),
        );

        self.retry
            .run("report generation", || {
                self.reasoning
                    .complete_structured::<QualitativeAnalysis>(REPORT_SYSTEM_PROMPT, &user_prompt)
            })
            .await
    }
}
