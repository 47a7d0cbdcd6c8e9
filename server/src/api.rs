// Murmur HTTP API server
//
// JSON endpoints over the speech service: /health, /say, /play, /files,
// /voices and a service info root.

use crate::types::{
    ErrorBody, FilesResponse, HealthResponse, PlayRequest, PlayResponse, SayRequest, SayResponse,
    ServiceInfo, VoicesQuery, VoicesResponse,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use murmur_core::{MurmurConfig, MurmurError, SpeechService};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// API server state
#[derive(Clone)]
struct ApiState {
    service: Arc<SpeechService>,
}

/// Error returned by handlers; renders as `{error_kind, message}`.
#[derive(Debug)]
pub struct ApiError(pub MurmurError);

impl From<MurmurError> for ApiError {
    fn from(err: MurmurError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(MurmurError::ValidationError(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MurmurError::UnknownVoice { .. }
            | MurmurError::ValidationError(_)
            | MurmurError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            MurmurError::FileNotFound(_) => StatusCode::NOT_FOUND,
            MurmurError::SynthesisFailed(_)
            | MurmurError::AudioBackendUnreachable { .. }
            | MurmurError::PlaybackFailed(_) => StatusCode::BAD_GATEWAY,
            MurmurError::SynthesisTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            MurmurError::Config(_) | MurmurError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(target: "api", kind = self.0.kind(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error_kind: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the API router around a ready speech service.
pub fn router(service: Arc<SpeechService>) -> Router {
    let state = ApiState { service };
    Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/say", post(say_handler))
        .route("/play", post(play_handler))
        .route("/files", get(files_handler))
        .route("/voices", get(voices_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// HTTP server for the speech service
pub struct MurmurServer {
    config: MurmurConfig,
    service: Arc<SpeechService>,
}

impl MurmurServer {
    pub fn new(config: MurmurConfig, service: Arc<SpeechService>) -> Self {
        Self { config, service }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        info!(target: "api", addr = %addr, "Starting Murmur server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(
            target: "api",
            url = %format!("http://{}", listener.local_addr()?),
            "Murmur server ready"
        );

        axum::serve(listener, router(self.service))
            .with_graceful_shutdown(shutdown)
            .await?;

        info!(target: "api", "Murmur server stopped");
        Ok(())
    }
}

/// Service info, including whether the engine and player can be found.
async fn info_handler(State(state): State<ApiState>) -> Json<ServiceInfo> {
    let service = &state.service;
    let registry = service.registry();
    Json(ServiceInfo {
        service: "murmur",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        audio_backend: service.sink().backend_description(),
        engine_available: service.engine_available(),
        player_available: service.sink().player_available(),
        voices: registry.ids(),
        default_voice: registry.default_voice().to_string(),
        audio_dir: service.sink().store().root().display().to_string(),
    })
}

/// Liveness only; dependencies are not probed.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn say_handler(
    State(state): State<ApiState>,
    payload: Result<Json<SayRequest>, JsonRejection>,
) -> ApiResult<SayResponse> {
    let Json(request) = payload?;
    let outcome = state.service.say(request.into()).await?;
    Ok(Json(outcome.into()))
}

async fn play_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PlayRequest>, JsonRejection>,
) -> ApiResult<PlayResponse> {
    let Json(request) = payload?;
    let filename = state.service.play(request.into()).await?;
    Ok(Json(PlayResponse {
        played: true,
        filename,
    }))
}

async fn files_handler(State(state): State<ApiState>) -> ApiResult<FilesResponse> {
    let files = state.service.list_files().await?;
    Ok(Json(FilesResponse { files }))
}

async fn voices_handler(
    State(state): State<ApiState>,
    Query(query): Query<VoicesQuery>,
) -> Json<VoicesResponse> {
    let registry = state.service.registry();
    let language = query.language.as_deref();
    let voices = registry.list(language).into_iter().cloned().collect();
    Json(VoicesResponse {
        voices,
        catalog: registry.catalog(language),
        default: registry.default_voice().to_string(),
    })
}
