use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    doctor::DoctorEndpoint,
    error::EvalError,
    patient::PatientSimulator,
    persona::{ClinicalInfo, PersonaProvider, PersonaRef},
    reasoning::ReasoningClient,
    report::{PerformanceReport, ReportGenerator},
    retry::RetryPolicy,
    scoring::{RoundEvaluation, ScoringEngine, StopReason},
    stop::StopConditionDetector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Doctor,
    Patient,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Doctor => "doctor",
            Speaker::Patient => "patient",
        }
    }
}

/// One utterance in a session. Patient turns carry the evaluation of the
/// round they close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub turn_number: u32,
    pub speaker: Speaker,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_evaluation: Option<RoundEvaluation>,
}

/// Complete record of one persona's dialogue with the doctor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSession {
    pub session_id: String,
    pub persona_id: String,
    pub doctor_agent_url: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub turns: Vec<DialogueTurn>,
    pub total_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_outcome: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    RoundStarted { round: u32, max_rounds: u32 },
    DoctorSpoke { round: u32, message: String },
    PatientSpoke { round: u32, message: String },
    RoundScored { evaluation: RoundEvaluation },
    Stopped { round: u32, reason: StopReason },
}

/// Runs the round loop for one persona: doctor turn, patient turn, round
/// scoring, stop check. The stop detector's verdict overwrites whatever
/// stop fields the scorer produced.
pub struct SessionOrchestrator {
    persona_provider: Arc<dyn PersonaProvider>,
    reasoning: ReasoningClient,
    scoring: ScoringEngine,
    stop: StopConditionDetector,
    report: ReportGenerator,
    patient_retry: RetryPolicy,
    event_callback: Option<Arc<dyn Fn(&SessionEvent) + Send + Sync>>,
}

impl SessionOrchestrator {
    pub fn new(
        persona_provider: Arc<dyn PersonaProvider>,
        reasoning: ReasoningClient,
        patient_retry: RetryPolicy,
        judge_retry: RetryPolicy,
    ) -> Self {
        Self {
            persona_provider,
            scoring: ScoringEngine::new(reasoning.clone(), judge_retry),
            stop: StopConditionDetector::new(reasoning.clone(), judge_retry),
            report: ReportGenerator::new(reasoning.clone(), judge_retry),
            reasoning,
            patient_retry,
            event_callback: None,
        }
    }

    pub fn with_event_callback(
        mut self,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    fn emit(&self, event: &SessionEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }

    pub async fn run_session(
        &self,
        persona_ref: &PersonaRef,
        doctor: &dyn DoctorEndpoint,
        max_rounds: u32,
    ) -> Result<(DialogueSession, PerformanceReport), EvalError> {
        let session_id = Uuid::new_v4().to_string();
        tracing::info!(
            session_id,
            persona = %persona_ref,
            max_rounds,
            "starting dialogue session"
        );

        let profile = self.persona_provider.resolve(persona_ref).await?;
        let mut patient = PatientSimulator::new(
            self.reasoning.clone(),
            profile.character_prompt.clone(),
            self.patient_retry,
        );

        let mut session = DialogueSession {
            session_id: session_id.clone(),
            persona_id: persona_ref.to_string(),
            doctor_agent_url: doctor.url().to_string(),
            start_time: Utc::now(),
            end_time: None,
            turns: Vec::new(),
            total_rounds: 0,
            final_outcome: None,
            stop_reason: None,
        };
        let mut round_evaluations: Vec<RoundEvaluation> = Vec::new();

        for round in 1..=max_rounds {
            tracing::info!(round, max_rounds, "round started");
            self.emit(&SessionEvent::RoundStarted { round, max_rounds });

            let doctor_context = build_doctor_context(&profile.clinical_info, &session.turns);
            let doctor_message = doctor
                .send(&doctor_context, round == 1)
                .await
                .map_err(EvalError::Doctor)?;

            session.turns.push(DialogueTurn {
                turn_number: session.turns.len() as u32 + 1,
                speaker: Speaker::Doctor,
                message: doctor_message.clone(),
                timestamp: Utc::now(),
                round_evaluation: None,
            });
            self.emit(&SessionEvent::DoctorSpoke {
                round,
                message: doctor_message.clone(),
            });

            let patient_message = patient.respond(&doctor_message).await;
            session.turns.push(DialogueTurn {
                turn_number: session.turns.len() as u32 + 1,
                speaker: Speaker::Patient,
                message: patient_message.clone(),
                timestamp: Utc::now(),
                round_evaluation: None,
            });
            self.emit(&SessionEvent::PatientSpoke {
                round,
                message: patient_message.clone(),
            });

            let transcript = build_transcript(&session.turns);
            let mut evaluation = self
                .scoring
                .evaluate_round(round, &doctor_message, &patient_message, &transcript, max_rounds)
                .await?;

            session.total_rounds = round;

            let (should_stop, stop_reason) = self
                .stop
                .should_stop(round, &patient_message, &transcript, max_rounds)
                .await?;

            // The detector is authoritative over the scorer's own stop guess.
            evaluation.should_stop = should_stop;
            evaluation.stop_reason = stop_reason;

            self.emit(&SessionEvent::RoundScored {
                evaluation: evaluation.clone(),
            });

            if let Some(turn) = session.turns.last_mut() {
                turn.round_evaluation = Some(evaluation.clone());
            }
            round_evaluations.push(evaluation);

            if should_stop {
                let reason = stop_reason.unwrap_or(StopReason::MaxRoundsReached);
                tracing::info!(round, reason = reason.as_str(), "stop condition met");
                session.final_outcome = Some(reason);
                session.stop_reason = Some(reason);
                self.emit(&SessionEvent::Stopped { round, reason });
                break;
            }
        }

        session.end_time = Some(Utc::now());

        let final_outcome = session.final_outcome.unwrap_or(StopReason::MaxRoundsReached);
        let transcript = build_transcript(&session.turns);
        let report = self
            .report
            .generate_report(&session_id, final_outcome, &round_evaluations, &transcript)
            .await?;

        tracing::info!(
            session_id,
            outcome = final_outcome.as_str(),
            aggregate = format!("{:.2}", report.aggregate_score),
            "session complete"
        );

        Ok((session, report))
    }
}

/// Doctor-facing context: clinical facts and the transcript so far. The
/// character prompt never crosses this boundary.
pub fn build_doctor_context(clinical_info: &ClinicalInfo, turns: &[DialogueTurn]) -> String {
    let gender = clinical_info
        .gender
        .map(|g| g.word())
        .unwrap_or("unspecified");

    let mut context = format!(
        "You are a doctor consulting with a patient about recommended surgical treatment.\n\n\
         === Patient Information ===\n\
         Age: {}\n\
         Gender: {}\n\
         Medical Case: {}\n\
         Symptoms: {}\n\
         Diagnosis: {}\n\
         Recommended Treatment: {}\n\n\
         === Case Background ===\n{}\n\n",
        clinical_info.age,
        gender,
        clinical_info.medical_case.slug(),
        clinical_info.symptoms,
        clinical_info.diagnosis,
        clinical_info.recommended_treatment,
        clinical_info.case_background,
    );

    if turns.is_empty() {
        context.push_str(
            "\nThis is your first message to the patient. Your goal is to:\n\
             1. Build rapport and show empathy\n\
             2. Present the medical situation clearly\n\
             3. Address potential concerns\n\
             4. Persuade the patient to accept the recommended treatment\n\n\
             Provide your opening message to the patient.",
        );
    } else {
        context.push_str("\n=== Dialogue History ===\n");
        for turn in turns {
            context.push_str(&format!(
                "{}: {}\n\n",
                turn.speaker.as_str().to_uppercase(),
                turn.message
            ));
        }
        context.push_str("Now provide your next response to the patient.");
    }

    context
}

pub fn build_transcript(turns: &[DialogueTurn]) -> String {
    let mut transcript = String::new();
    for turn in turns {
        transcript.push_str(&format!(
            "{}: {}\n\n",
            turn.speaker.as_str().to_uppercase(),
            turn.message
        ));
    }
    transcript
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{build_doctor_context, build_transcript, DialogueTurn, Speaker};
    use crate::persona::{ClinicalInfo, Gender, MedicalCase};

    fn clinical_info() -> ClinicalInfo {
        ClinicalInfo {
            age: 34,
            gender: Some(Gender::Male),
            medical_case: MedicalCase::Pneumothorax,
            symptoms: "sudden chest pain, shortness of breath".to_string(),
            diagnosis: "spontaneous pneumothorax".to_string(),
            recommended_treatment: "video-assisted thoracoscopic surgery".to_string(),
            treatment_risks: "bleeding, infection".to_string(),
            treatment_benefits: "prevents recurrence".to_string(),
            prognosis_with_treatment: "full recovery expected".to_string(),
            prognosis_without_treatment: "high recurrence risk".to_string(),
            case_background: "Collapsed lung found on imaging.".to_string(),
        }
    }

    fn turn(number: u32, speaker: Speaker, message: &str) -> DialogueTurn {
        DialogueTurn {
            turn_number: number,
            speaker,
            message: message.to_string(),
            timestamp: Utc::now(),
            round_evaluation: None,
        }
    }

    #[test]
    fn first_round_context_carries_opening_instructions() {
        let context = build_doctor_context(&clinical_info(), &[]);

        assert!(context.contains("Age: 34"));
        assert!(context.contains("Gender: male"));
        assert!(context.contains("opening message"));
        assert!(!context.contains("Dialogue History"));
    }

    #[test]
    fn later_rounds_embed_the_transcript_instead() {
        let turns = vec![
            turn(1, Speaker::Doctor, "Hello, I have your results."),
            turn(2, Speaker::Patient, "How bad is it?"),
        ];
        let context = build_doctor_context(&clinical_info(), &turns);

        assert!(context.contains("=== Dialogue History ==="));
        assert!(context.contains("DOCTOR: Hello, I have your results."));
        assert!(context.contains("PATIENT: How bad is it?"));
        assert!(context.contains("next response"));
        assert!(!context.contains("opening message"));
    }

    #[test]
    fn context_never_leaks_character_material() {
        // Personality, concerns, and lifestyle have no field in ClinicalInfo,
        // so nothing character-shaped can appear in the context.
        let context = build_doctor_context(&clinical_info(), &[]);
        assert!(!context.to_lowercase().contains("personality"));
    }

    #[test]
    fn transcript_upper_cases_speakers_in_order() {
        let turns = vec![
            turn(1, Speaker::Doctor, "a"),
            turn(2, Speaker::Patient, "b"),
        ];
        assert_eq!(build_transcript(&turns), "DOCTOR: a\n\nPATIENT: b\n\n");
    }
}
