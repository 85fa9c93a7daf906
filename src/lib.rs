pub mod error;
pub mod providers;
pub mod types;
pub mod history;
pub mod retry;
pub mod reasoning;
pub mod persona;
pub mod doctor;
pub mod patient;
pub mod scoring;
pub mod stop;
pub mod report;
pub mod session;
pub mod config;
pub mod batch;

pub use error::{EvalError, LLMError};
pub use providers::LLMProvider;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage,
};
pub use history::ChatHistory;
pub use retry::{RetryError, RetryPolicy};
pub use reasoning::ReasoningClient;
pub use persona::{
    ClinicalInfo,
    Gender,
    Mbti,
    MedicalCase,
    PersonaError,
    PersonaProfile,
    PersonaProvider,
    PersonaRef,
    StaticPersonaProvider,
    TemplatePersonaProvider,
};
pub use doctor::{DoctorEndpoint, HttpDoctorEndpoint};
pub use patient::PatientSimulator;
pub use scoring::{RoundEvaluation, ScoringEngine, StopReason};
pub use stop::{StopConditionDetector, StopDecision};
pub use report::{PerformanceReport, QualitativeAnalysis, ReportGenerator};
pub use session::{
    DialogueSession,
    DialogueTurn,
    SessionEvent,
    SessionOrchestrator,
    Speaker,
};
pub use config::{EvalConfig, EvalRequest, RetrySettings};
pub use batch::{BatchCoordinator, BatchResult};
pub use schemars::JsonSchema;
