use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use konsilium::{
    BatchCoordinator, BatchResult, EvalError, EvalRequest, HttpDoctorEndpoint,
    ReasoningClient, SessionOrchestrator, TemplatePersonaProvider,
};
use konsilium::providers::openai::OpenAI;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prompts_dir = PathBuf::from(
        std::env::var("PROMPTS_DIR").unwrap_or_else(|_| "prompts".to_string()),
    );
    let model = std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4".to_string());

    let app_state = Arc::new(AppState { prompts_dir, model });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/evaluate", post(evaluate))
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9009);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

struct AppState {
    prompts_dir: PathBuf,
    model: String,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    success: bool,
}

async fn health() -> impl IntoResponse {
    Json(ApiResponse {
        data: "ok",
        message: None,
        success: true,
    })
}

async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvalRequest>,
) -> impl IntoResponse {
    let provider = match OpenAI::from_env() {
        Ok(provider) => provider,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse {
                    data: Option::<BatchResult>::None,
                    message: Some(format!("Failed to create provider: {}", e)),
                    success: false,
                }),
            )
                .into_response();
        }
    };

    let reasoning = ReasoningClient::new(Arc::new(provider), state.model.clone());
    let persona_provider = Arc::new(TemplatePersonaProvider::new(&state.prompts_dir));

    let orchestrator = SessionOrchestrator::new(
        persona_provider,
        reasoning,
        request.config.retry.patient_policy(),
        request.config.retry.judge_policy(),
    );

    let doctor_url = match request.participants.get("doctor") {
        Some(url) => url.clone(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse {
                    data: Option::<BatchResult>::None,
                    message: Some("missing role: doctor".to_string()),
                    success: false,
                }),
            )
                .into_response();
        }
    };
    let doctor = match HttpDoctorEndpoint::new(doctor_url) {
        Ok(doctor) => doctor,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse {
                    data: Option::<BatchResult>::None,
                    message: Some(format!("Failed to create doctor endpoint: {}", e)),
                    success: false,
                }),
            )
                .into_response();
        }
    };

    match BatchCoordinator::new(orchestrator)
        .run_batch(&request, &doctor)
        .await
    {
        Ok(result) => Json(ApiResponse {
            data: Some(result),
            message: None,
            success: true,
        })
        .into_response(),
        Err(e @ EvalError::InvalidRequest(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                data: Option::<BatchResult>::None,
                message: Some(e.to_string()),
                success: false,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                data: Option::<BatchResult>::None,
                message: Some(format!("Evaluation error: {}", e)),
                success: false,
            }),
        )
            .into_response(),
    }
}
