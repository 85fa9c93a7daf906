use std::{fs, path::PathBuf, sync::Arc};

use clap::Parser;
use konsilium::{
    BatchCoordinator, EvalRequest, HttpDoctorEndpoint, ReasoningClient, SessionEvent,
    SessionOrchestrator, TemplatePersonaProvider,
};
use konsilium::providers::openai::{OpenAI, OpenAIConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "judge")]
#[command(about = "Run round-based doctor-patient dialogue evaluations")]
struct Args {
    /// Path to the evaluation request (JSON or YAML)
    #[arg(short, long)]
    request: PathBuf,

    /// Directory holding persona prompt templates
    #[arg(long, default_value = "prompts")]
    prompts: PathBuf,

    /// Model name (can also set DEFAULT_MODEL env var)
    #[arg(long)]
    model: Option<String>,

    /// API key for the model provider (can also set API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL for the API endpoint (can also set BASE_URL env var)
    #[arg(long)]
    base_url: Option<String>,

    /// Write the full batch result to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let content = fs::read_to_string(&args.request)?;
    let request: EvalRequest = match args.request.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };

    let provider = match args.api_key {
        Some(api_key) => {
            let mut config = OpenAIConfig::new(api_key);
            if let Some(base_url) = args.base_url.or_else(|| std::env::var("BASE_URL").ok()) {
                config = config.with_base_url(base_url);
            }
            if let Ok(api_version) = std::env::var("AZURE_OPENAI_API_VERSION") {
                config = config.with_api_version(api_version);
            }
            OpenAI::from_config(config)?
        }
        None => OpenAI::from_env()?,
    };
    let model = args
        .model
        .or_else(|| std::env::var("DEFAULT_MODEL").ok())
        .unwrap_or_else(|| "gpt-4".to_string());

    let reasoning = ReasoningClient::new(Arc::new(provider), model);
    let persona_provider = Arc::new(TemplatePersonaProvider::new(&args.prompts));

    let orchestrator = SessionOrchestrator::new(
        persona_provider,
        reasoning,
        request.config.retry.patient_policy(),
        request.config.retry.judge_policy(),
    )
    .with_event_callback(|event| {
        if let SessionEvent::RoundScored { evaluation } = event {
            println!(
                "  round {}: E={:.1} P={:.1} S={:.1}",
                evaluation.round_number,
                evaluation.empathy_score,
                evaluation.persuasion_score,
                evaluation.safety_score
            );
        }
    });

    let doctor_url = request
        .participants
        .get("doctor")
        .cloned()
        .unwrap_or_default();
    let doctor = HttpDoctorEndpoint::new(doctor_url)?;

    let result = BatchCoordinator::new(orchestrator)
        .run_batch(&request, &doctor)
        .await?;

    println!("Mean Aggregate Score: {:.2}", result.mean_aggregate_score);
    println!("{}", result.overall_summary);

    let serialized = serde_json::to_string_pretty(&result)?;
    match args.output {
        Some(path) => fs::write(path, serialized)?,
        None => println!("{serialized}"),
    }

    Ok(())
}
