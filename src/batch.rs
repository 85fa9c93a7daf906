use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::EvalRequest,
    doctor::DoctorEndpoint,
    error::EvalError,
    report::PerformanceReport,
    session::{DialogueSession, SessionOrchestrator},
};

/// Result of a full batch: one session and one report per persona, plus
/// aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub assessment_id: String,
    pub doctor_agent_url: String,
    pub timestamp: DateTime<Utc>,
    pub sessions: Vec<DialogueSession>,
    pub reports: Vec<PerformanceReport>,
    pub mean_aggregate_score: f64,
    pub overall_summary: String,
}

/// Runs sessions sequentially over the expanded persona list. Each persona
/// gets a fresh session; one persona's failure aborts the batch because a
/// partial result would misstate the doctor's performance.
pub struct BatchCoordinator {
    orchestrator: SessionOrchestrator,
}

impl BatchCoordinator {
    pub fn new(orchestrator: SessionOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn run_batch(
        &self,
        request: &EvalRequest,
        doctor: &dyn DoctorEndpoint,
    ) -> Result<BatchResult, EvalError> {
        let (doctor_url, personas) = request.validate()?;
        let max_rounds = request.config.max_rounds;

        tracing::info!(
            personas = personas.len(),
            max_rounds,
            doctor_url,
            "starting batch evaluation"
        );

        let mut sessions = Vec::with_capacity(personas.len());
        let mut reports = Vec::with_capacity(personas.len());

        for (idx, persona) in personas.iter().enumerate() {
            tracing::info!(
                persona = %persona,
                progress = format!("{}/{}", idx + 1, personas.len()),
                "evaluating persona"
            );

            let (session, report) = self
                .orchestrator
                .run_session(persona, doctor, max_rounds)
                .await?;

            tracing::info!(
                persona = %persona,
                outcome = report.final_outcome.as_str(),
                score = format!("{:.1}", report.aggregate_score),
                "persona complete"
            );

            sessions.push(session);
            reports.push(report);
        }

        let mean_aggregate_score =
            reports.iter().map(|r| r.aggregate_score).sum::<f64>() / reports.len() as f64;
        let overall_summary = batch_summary(&sessions, &reports, mean_aggregate_score);

        tracing::info!(
            mean = format!("{mean_aggregate_score:.2}"),
            "batch evaluation complete"
        );

        Ok(BatchResult {
            assessment_id: Uuid::new_v4().to_string(),
            doctor_agent_url: doctor_url,
            timestamp: Utc::now(),
            sessions,
            reports,
            mean_aggregate_score,
            overall_summary,
        })
    }
}

fn batch_summary(
    sessions: &[DialogueSession],
    reports: &[PerformanceReport],
    mean_score: f64,
) -> String {
    let mut summary = format!(
        "Evaluated {} patient personas\nMean Aggregate Score: {mean_score:.2}/100\n\n",
        sessions.len()
    );

    // Outcome counts keep first-seen order so the summary is stable.
    let mut outcomes: Vec<(&str, usize)> = Vec::new();
    for session in sessions {
        let outcome = session
            .final_outcome
            .map(|r| r.as_str())
            .unwrap_or("unknown");
        match outcomes.iter_mut().find(|(name, _)| *name == outcome) {
            Some((_, count)) => *count += 1,
            None => outcomes.push((outcome, 1)),
        }
    }

    summary.push_str("Outcomes:\n");
    for (outcome, count) in &outcomes {
        summary.push_str(&format!(
            "  {outcome}: {count} ({:.1}%)\n",
            *count as f64 / sessions.len() as f64 * 100.0
        ));
    }

    let min = reports
        .iter()
        .map(|r| r.aggregate_score)
        .fold(f64::INFINITY, f64::min);
    let max = reports
        .iter()
        .map(|r| r.aggregate_score)
        .fold(f64::NEG_INFINITY, f64::max);
    summary.push_str(&format!("\nScore range: {min:.2} - {max:.2}\n"));

    summary
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::batch_summary;
    use crate::{
        report::PerformanceReport,
        scoring::StopReason,
        session::DialogueSession,
    };

    fn session(outcome: StopReason) -> DialogueSession {
        DialogueSession {
            session_id: "s".to_string(),
            persona_id: "INTJ_M_PNEUMO".to_string(),
            doctor_agent_url: "http://localhost:9010".to_string(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            turns: Vec::new(),
            total_rounds: 1,
            final_outcome: Some(outcome),
            stop_reason: Some(outcome),
        }
    }

    fn report(score: f64) -> PerformanceReport {
        PerformanceReport {
            session_id: "s".to_string(),
            final_outcome: StopReason::PatientAccepted,
            total_rounds: 1,
            round_scores: Vec::new(),
            overall_empathy: 5.0,
            overall_persuasion: 5.0,
            overall_safety: 5.0,
            aggregate_score: score,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            key_moments: Vec::new(),
            improvement_recommendations: Vec::new(),
            alternative_approaches: Vec::new(),
            evaluation_summary: String::new(),
        }
    }

    #[test]
    fn summary_counts_outcomes_and_score_range() {
        let sessions = vec![
            session(StopReason::PatientAccepted),
            session(StopReason::PatientAccepted),
            session(StopReason::PatientLeft),
            session(StopReason::MaxRoundsReached),
        ];
        let reports = vec![report(80.0), report(75.0), report(30.0), report(55.0)];

        let summary = batch_summary(&sessions, &reports, 60.0);

        assert!(summary.contains("Evaluated 4 patient personas"));
        assert!(summary.contains("Mean Aggregate Score: 60.00/100"));
        assert!(summary.contains("patient_accepted: 2 (50.0%)"));
        assert!(summary.contains("patient_left: 1 (25.0%)"));
        assert!(summary.contains("max_rounds_reached: 1 (25.0%)"));
        assert!(summary.contains("Score range: 30.00 - 80.00"));
    }
}
