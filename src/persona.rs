use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// All 16 personality archetypes, MBTI coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mbti {
    Intj,
    Intp,
    Entj,
    Entp,
    Infj,
    Infp,
    Enfj,
    Enfp,
    Istj,
    Isfj,
    Estj,
    Esfj,
    Istp,
    Isfp,
    Estp,
    Esfp,
}

impl Mbti {
    pub const ALL: [Mbti; 16] = [
        Mbti::Intj,
        Mbti::Intp,
        Mbti::Entj,
        Mbti::Entp,
        Mbti::Infj,
        Mbti::Infp,
        Mbti::Enfj,
        Mbti::Enfp,
        Mbti::Istj,
        Mbti::Isfj,
        Mbti::Estj,
        Mbti::Esfj,
        Mbti::Istp,
        Mbti::Isfp,
        Mbti::Estp,
        Mbti::Esfp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mbti::Intj => "INTJ",
            Mbti::Intp => "INTP",
            Mbti::Entj => "ENTJ",
            Mbti::Entp => "ENTP",
            Mbti::Infj => "INFJ",
            Mbti::Infp => "INFP",
            Mbti::Enfj => "ENFJ",
            Mbti::Enfp => "ENFP",
            Mbti::Istj => "ISTJ",
            Mbti::Isfj => "ISFJ",
            Mbti::Estj => "ESTJ",
            Mbti::Esfj => "ESFJ",
            Mbti::Istp => "ISTP",
            Mbti::Isfp => "ISFP",
            Mbti::Estp => "ESTP",
            Mbti::Esfp => "ESFP",
        }
    }
}

impl FromStr for Mbti {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Mbti::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| PersonaError::UnknownArchetype(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    /// Single-letter persona-id segment.
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalCase {
    Pneumothorax,
    LungCancer,
}

impl MedicalCase {
    pub const ALL: [MedicalCase; 2] = [MedicalCase::Pneumothorax, MedicalCase::LungCancer];

    /// Persona-id segment.
    pub fn code(&self) -> &'static str {
        match self {
            MedicalCase::Pneumothorax => "PNEUMO",
            MedicalCase::LungCancer => "LUNG",
        }
    }

    /// Template file stem.
    pub fn slug(&self) -> &'static str {
        match self {
            MedicalCase::Pneumothorax => "pneumothorax",
            MedicalCase::LungCancer => "lung_cancer",
        }
    }
}

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("invalid persona id '{0}': expected MBTI_GENDER_CASE or MBTI_CASE")]
    InvalidFormat(String),
    #[error("unknown personality archetype: {0}")]
    UnknownArchetype(String),
    #[error("unknown gender code: {0} (use M or F)")]
    UnknownGender(String),
    #[error("unknown case code: {0} (use PNEUMO or LUNG)")]
    UnknownCase(String),
    #[error("unknown persona: {0}")]
    UnknownPersona(String),
    #[error("prompt template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("case file error: {0}")]
    CaseFile(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable persona identifier: archetype, optional gender, medical case.
/// Parsed once per evaluation request, e.g. `INTJ_M_PNEUMO` or `ESFP_LUNG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersonaRef {
    pub mbti: Mbti,
    pub gender: Option<Gender>,
    pub case: MedicalCase,
}

static PERSONA_ID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{4}(_[A-Za-z])?_[A-Za-z]+$").unwrap());

impl PersonaRef {
    pub fn new(mbti: Mbti, gender: Option<Gender>, case: MedicalCase) -> Self {
        Self { mbti, gender, case }
    }

    /// Full enumerated cross-product: 16 archetypes x 2 genders x 2 cases.
    pub fn all() -> Vec<PersonaRef> {
        let mut refs = Vec::with_capacity(64);
        for mbti in Mbti::ALL {
            for gender in Gender::ALL {
                for case in MedicalCase::ALL {
                    refs.push(PersonaRef::new(mbti, Some(gender), case));
                }
            }
        }
        refs
    }

    /// Expands a persona-id list; the `all` wildcard anywhere in the list
    /// yields the full cross-product.
    pub fn expand(ids: &[String]) -> Result<Vec<PersonaRef>, PersonaError> {
        if ids.iter().any(|id| id.eq_ignore_ascii_case("all")) {
            return Ok(Self::all());
        }
        ids.iter().map(|id| id.parse()).collect()
    }
}

impl FromStr for PersonaRef {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !PERSONA_ID_SHAPE.is_match(s) {
            return Err(PersonaError::InvalidFormat(s.to_string()));
        }

        let parts: Vec<&str> = s.split('_').collect();
        let (mbti_part, gender_part, case_part) = match parts.as_slice() {
            [mbti, case] => (*mbti, None, *case),
            [mbti, gender, case] => (*mbti, Some(*gender), *case),
            _ => return Err(PersonaError::InvalidFormat(s.to_string())),
        };

        let mbti: Mbti = mbti_part.parse()?;

        let gender = match gender_part.map(|g| g.to_ascii_uppercase()) {
            None => None,
            Some(g) if g == "M" => Some(Gender::Male),
            Some(g) if g == "F" => Some(Gender::Female),
            Some(g) => return Err(PersonaError::UnknownGender(g)),
        };

        let case = match case_part.to_ascii_uppercase().as_str() {
            "PNEUMO" => MedicalCase::Pneumothorax,
            "LUNG" => MedicalCase::LungCancer,
            other => return Err(PersonaError::UnknownCase(other.to_string())),
        };

        Ok(PersonaRef::new(mbti, gender, case))
    }
}

impl fmt::Display for PersonaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gender {
            Some(gender) => write!(f, "{}_{}_{}", self.mbti.as_str(), gender.code(), self.case.code()),
            None => write!(f, "{}_{}", self.mbti.as_str(), self.case.code()),
        }
    }
}

/// The doctor-visible factual subset of a persona's medical record. Holds no
/// personality, concern or lifestyle fields: the confidentiality partition is
/// enforced by construction, not by filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalInfo {
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    pub medical_case: MedicalCase,
    pub symptoms: String,
    pub diagnosis: String,
    pub recommended_treatment: String,
    pub treatment_risks: String,
    pub treatment_benefits: String,
    pub prognosis_with_treatment: String,
    pub prognosis_without_treatment: String,
    pub case_background: String,
}

/// Everything the engine consumes about one persona: the reference, the
/// doctor-facing clinical subset and the private patient system prompt.
#[derive(Debug, Clone)]
pub struct PersonaProfile {
    pub reference: PersonaRef,
    pub clinical_info: ClinicalInfo,
    pub character_prompt: String,
}

#[async_trait]
pub trait PersonaProvider: Send + Sync {
    async fn resolve(&self, reference: &PersonaRef) -> Result<PersonaProfile, PersonaError>;
}

/// In-memory provider for tests and for callers that assemble profiles
/// elsewhere.
#[derive(Default)]
pub struct StaticPersonaProvider {
    profiles: HashMap<String, PersonaProfile>,
}

impl StaticPersonaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: PersonaProfile) -> Self {
        self.profiles.insert(profile.reference.to_string(), profile);
        self
    }
}

#[async_trait]
impl PersonaProvider for StaticPersonaProvider {
    async fn resolve(&self, reference: &PersonaRef) -> Result<PersonaProfile, PersonaError> {
        self.profiles
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| PersonaError::UnknownPersona(reference.to_string()))
    }
}

/// Clinical facts plus case narrative, one YAML file per medical case.
#[derive(Debug, Clone, Deserialize)]
struct CaseFile {
    clinical: ClinicalInfo,
    case_prompt: String,
}

/// File-driven persona assembly: archetype and gender prompt text files, one
/// clinical YAML per case, and a handlebars template that renders the patient
/// system prompt.
pub struct TemplatePersonaProvider {
    prompts_dir: PathBuf,
}

impl TemplatePersonaProvider {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    fn read_template(&self, path: &Path) -> Result<String, PersonaError> {
        if !path.exists() {
            return Err(PersonaError::TemplateNotFound(path.to_path_buf()));
        }
        Ok(fs::read_to_string(path)?.trim().to_string())
    }

    fn load(&self, reference: &PersonaRef) -> Result<PersonaProfile, PersonaError> {
        let mbti_prompt = self.read_template(
            &self
                .prompts_dir
                .join("mbti")
                .join(format!("{}.txt", reference.mbti.as_str().to_lowercase())),
        )?;

        let gender_prompt = match reference.gender {
            Some(gender) => Some(self.read_template(
                &self.prompts_dir.join("gender").join(format!("{}.txt", gender.word())),
            )?),
            None => None,
        };

        let case_path = self
            .prompts_dir
            .join("cases")
            .join(format!("{}.yaml", reference.case.slug()));
        let case_file: CaseFile = serde_yaml::from_str(&self.read_template(&case_path)?)?;

        let template_path = self.prompts_dir.join("character.hbs");
        let template = self.read_template(&template_path)?;

        let mut clinical_info = case_file.clinical;
        if reference.gender.is_some() {
            clinical_info.gender = reference.gender;
        }

        let hb = Handlebars::new();
        let character_prompt = hb.render_template(
            &template,
            &json!({
                "mbti_type": reference.mbti.as_str(),
                "mbti_prompt": mbti_prompt,
                "gender": reference.gender.map(|g| g.word()),
                "gender_prompt": gender_prompt,
                "case": reference.case.slug(),
                "case_prompt": case_file.case_prompt,
                "age": clinical_info.age,
                "symptoms": clinical_info.symptoms,
                "diagnosis": clinical_info.diagnosis,
                "recommended_treatment": clinical_info.recommended_treatment,
            }),
        )?;

        Ok(PersonaProfile {
            reference: *reference,
            clinical_info,
            character_prompt,
        })
    }
}

#[async_trait]
impl PersonaProvider for TemplatePersonaProvider {
    async fn resolve(&self, reference: &PersonaRef) -> Result<PersonaProfile, PersonaError> {
        self.load(reference)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{Gender, MedicalCase, Mbti, PersonaError, PersonaRef};

    #[test]
    fn parses_full_persona_id() {
        let parsed: PersonaRef = "INTJ_M_PNEUMO".parse().unwrap();
        assert_eq!(parsed.mbti, Mbti::Intj);
        assert_eq!(parsed.gender, Some(Gender::Male));
        assert_eq!(parsed.case, MedicalCase::Pneumothorax);
        assert_eq!(parsed.to_string(), "INTJ_M_PNEUMO");
    }

    #[test]
    fn parses_genderless_persona_id() {
        let parsed: PersonaRef = "ESFP_LUNG".parse().unwrap();
        assert_eq!(parsed.mbti, Mbti::Esfp);
        assert_eq!(parsed.gender, None);
        assert_eq!(parsed.case, MedicalCase::LungCancer);
        assert_eq!(parsed.to_string(), "ESFP_LUNG");
    }

    #[test]
    fn rejects_unknown_components() {
        assert!(matches!(
            "XXXX_M_PNEUMO".parse::<PersonaRef>(),
            Err(PersonaError::UnknownArchetype(_))
        ));
        assert!(matches!(
            "INTJ_X_PNEUMO".parse::<PersonaRef>(),
            Err(PersonaError::UnknownGender(_))
        ));
        assert!(matches!(
            "INTJ_M_GALLSTONES".parse::<PersonaRef>(),
            Err(PersonaError::UnknownCase(_))
        ));
        assert!(matches!(
            "not a persona id".parse::<PersonaRef>(),
            Err(PersonaError::InvalidFormat(_))
        ));
    }

    #[test]
    fn wildcard_expands_to_all_64_distinct_ids() {
        let refs = PersonaRef::expand(&["all".to_string()]).unwrap();
        assert_eq!(refs.len(), 64);

        let ids: HashSet<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(ids.len(), 64);
        assert!(ids.contains("INTJ_M_PNEUMO"));
        assert!(ids.contains("ESFP_F_LUNG"));
    }

    #[test]
    fn explicit_list_passes_through() {
        let refs =
            PersonaRef::expand(&["INTJ_M_PNEUMO".to_string(), "ESFP_F_LUNG".to_string()]).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].to_string(), "INTJ_M_PNEUMO");
        assert_eq!(refs[1].to_string(), "ESFP_F_LUNG");
    }
}
