use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::EvalError, persona::PersonaRef, retry::RetryPolicy};

/// Retry knobs for the two call categories. The patient path is allowed to
/// fall back, the judge paths are not, so the judge gets more attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_patient_max_retries")]
    pub patient_max_retries: u32,
    #[serde(default = "default_patient_retry_delay")]
    pub patient_retry_delay: u64,
    #[serde(default = "default_judge_max_retries")]
    pub judge_max_retries: u32,
    #[serde(default = "default_judge_retry_delay")]
    pub judge_retry_delay: u64,
}

fn default_patient_max_retries() -> u32 {
    3
}

fn default_patient_retry_delay() -> u64 {
    2
}

fn default_judge_max_retries() -> u32 {
    5
}

fn default_judge_retry_delay() -> u64 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            patient_max_retries: default_patient_max_retries(),
            patient_retry_delay: default_patient_retry_delay(),
            judge_max_retries: default_judge_max_retries(),
            judge_retry_delay: default_judge_retry_delay(),
        }
    }
}

impl RetrySettings {
    pub fn patient_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.patient_max_retries,
            Duration::from_secs(self.patient_retry_delay),
        )
    }

    pub fn judge_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.judge_max_retries,
            Duration::from_secs(self.judge_retry_delay),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Persona ids, or the single wildcard "all".
    pub persona_ids: Vec<String>,
    pub max_rounds: u32,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Top-level evaluation request. `participants` maps role names to agent
/// endpoint URLs; only the "doctor" role is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRequest {
    pub participants: HashMap<String, String>,
    pub config: EvalConfig,
}

impl EvalRequest {
    /// Checks structural validity and resolves the persona list. Returns the
    /// doctor URL and the expanded persona references.
    pub fn validate(&self) -> Result<(String, Vec<PersonaRef>), EvalError> {
        let doctor_url = self
            .participants
            .get("doctor")
            .ok_or_else(|| EvalError::InvalidRequest("missing role: doctor".to_string()))?
            .clone();

        if self.config.max_rounds < 1 {
            return Err(EvalError::InvalidRequest(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if self.config.persona_ids.is_empty() {
            return Err(EvalError::InvalidRequest(
                "persona_ids must not be empty".to_string(),
            ));
        }

        let personas = PersonaRef::expand(&self.config.persona_ids)
            .map_err(|e| EvalError::InvalidRequest(e.to_string()))?;

        Ok((doctor_url, personas))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{EvalConfig, EvalRequest, RetrySettings};
    use crate::error::EvalError;

    fn request(persona_ids: Vec<&str>, max_rounds: u32) -> EvalRequest {
        let mut participants = HashMap::new();
        participants.insert("doctor".to_string(), "http://localhost:9010".to_string());
        EvalRequest {
            participants,
            config: EvalConfig {
                persona_ids: persona_ids.into_iter().map(String::from).collect(),
                max_rounds,
                retry: RetrySettings::default(),
            },
        }
    }

    #[test]
    fn valid_request_resolves_personas() {
        let (url, personas) = request(vec!["INTJ_M_PNEUMO", "ENFP_F_LUNG"], 5)
            .validate()
            .unwrap();
        assert_eq!(url, "http://localhost:9010");
        assert_eq!(personas.len(), 2);
    }

    #[test]
    fn missing_doctor_role_is_rejected() {
        let mut req = request(vec!["INTJ_M_PNEUMO"], 5);
        req.participants.clear();
        assert!(matches!(
            req.validate().unwrap_err(),
            EvalError::InvalidRequest(msg) if msg.contains("doctor")
        ));
    }

    #[test]
    fn zero_rounds_is_rejected() {
        assert!(matches!(
            request(vec!["INTJ_M_PNEUMO"], 0).validate().unwrap_err(),
            EvalError::InvalidRequest(msg) if msg.contains("max_rounds")
        ));
    }

    #[test]
    fn unknown_persona_id_is_rejected() {
        assert!(request(vec!["ZZZZ_M_PNEUMO"], 5).validate().is_err());
    }

    #[test]
    fn wildcard_expands() {
        let (_, personas) = request(vec!["all"], 3).validate().unwrap();
        assert_eq!(personas.len(), 64);
    }

    #[test]
    fn retry_defaults_apply_when_omitted() {
        let json = r#"{
            "participants": {"doctor": "http://localhost:9010"},
            "config": {"persona_ids": ["INTJ_M_PNEUMO"], "max_rounds": 5}
        }"#;
        let req: EvalRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.config.retry.patient_max_retries, 3);
        assert_eq!(req.config.retry.judge_max_retries, 5);
        assert_eq!(req.config.retry.judge_retry_delay, 3);
    }
}
