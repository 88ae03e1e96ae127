//! `pagecraft serve`: the browser front end.
//!
//! Handlers never touch the preview frame themselves. Documents go to the
//! renderer task as [`RenderCommand`]s; the renderer writes them into a
//! [`ServedContext`], which the host page fetches and writes into its
//! sandboxed frame. The page reports load, console and error events back
//! through `POST /api/events`.

use crate::config::{Config, CredentialStore};
use crate::host_page::{build_host_page, CYCLE_HEADER};
use crate::llm_generator::{CodeGenerator, GenerationRequest};
use crate::pipeline::build_generator;
use crate::providers::{MemoryNotifier, Notifier, Toast, ToastVariant};
use crate::renderer::{
    drive, ContextEvent, CycleId, IsolatedContext, RenderCommand, RenderSnapshot, Renderer,
};
use crate::session::{PendingGeneration, PreviewSession};
use anyhow::{anyhow, Result};
use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DOWNLOAD_FILE_NAME: &str = "generated-app.jsx";

const TOAST_CAPACITY: usize = 20;

/// A document written by the renderer, waiting for the host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedDocument {
    pub cycle: CycleId,
    pub html: String,
}

/// Isolated context backed by the host page's sandboxed frame.
#[derive(Clone, Default)]
pub struct ServedContext {
    slot: Arc<Mutex<Option<ServedDocument>>>,
}

impl ServedContext {
    pub fn current(&self) -> Option<ServedDocument> {
        match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl IsolatedContext for ServedContext {
    fn write_document(&mut self, cycle: CycleId, html: &str) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("preview document slot is poisoned"))?;
        *slot = Some(ServedDocument {
            cycle,
            html: html.to_string(),
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub generator: Arc<dyn CodeGenerator>,
    pub session: Arc<PreviewSession>,
    pub context: ServedContext,
    pub model: String,
    pub commands: mpsc::Sender<RenderCommand>,
    pub events: mpsc::Sender<ContextEvent>,
    pub status: watch::Receiver<RenderSnapshot>,
}

impl AppState {
    /// Builds the state and spawns the renderer task.
    pub fn spawn(
        config: &Config,
        credentials: Arc<CredentialStore>,
        notifier: Arc<MemoryNotifier>,
        generator: Arc<dyn CodeGenerator>,
        model: impl Into<String>,
    ) -> Self {
        let context = ServedContext::default();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(RenderSnapshot::default());

        let renderer = Renderer::new(context.clone(), config.render_timeout());
        tokio::spawn(drive(renderer, command_rx, event_rx, status_tx));

        Self {
            credentials,
            notifier,
            generator,
            session: Arc::new(PreviewSession::new()),
            context,
            model: model.into(),
            commands: command_tx,
            events: event_tx,
            status: status_rx,
        }
    }
}

// Request / response types

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GenerateResponse {
    /// `rendering`, `failed` or `superseded`.
    pub status: &'static str,
    pub generation: u64,
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub render: RenderSnapshot,
    pub generating: bool,
    pub has_api_key: bool,
    pub model: String,
    pub toasts: Vec<Toast>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn renderer_stopped() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "Renderer is not running")
}

async fn send_command(
    state: &AppState,
    command: RenderCommand,
) -> std::result::Result<(), ApiError> {
    state
        .commands
        .send(command)
        .await
        .map_err(|_| renderer_stopped())
}

// Handlers

pub async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(build_host_page(&state.model))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let render = state.status.borrow().clone();
    Json(StatusResponse {
        render,
        generating: state.session.is_generating(),
        has_api_key: state.credentials.is_set(),
        model: state.model.clone(),
        toasts: state.notifier.toasts(),
    })
}

pub async fn generate_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> std::result::Result<Json<GenerateResponse>, ApiError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Prompt must not be empty"));
    }
    let model = payload
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.model.clone());

    // Dropping `pending` (failure or a cancelled request) clears the in-flight flag.
    let pending = PendingGeneration::begin(state.session.clone());
    let token = pending.token();
    let request = GenerationRequest::new(prompt).with_model(model);

    let Some(result) = state.generator.generate_code(&request).await else {
        return Ok(Json(GenerateResponse {
            status: "failed",
            generation: token.id(),
        }));
    };

    // Reserve first so nothing awaits between accepting the result and sending it.
    let permit = state.commands.reserve().await.map_err(|_| renderer_stopped())?;
    let Some(document) = pending.complete(result) else {
        return Ok(Json(GenerateResponse {
            status: "superseded",
            generation: token.id(),
        }));
    };

    if let Err(e) = document.plan.require_component() {
        warn!("{}", e);
    }
    permit.send(RenderCommand::Render(document));

    Ok(Json(GenerateResponse {
        status: "rendering",
        generation: token.id(),
    }))
}

pub async fn credential_handler(
    State(state): State<AppState>,
    Json(payload): Json<CredentialRequest>,
) -> std::result::Result<Json<CredentialResponse>, ApiError> {
    let key = payload.api_key.trim();
    if key.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "API key must not be empty"));
    }

    let saved = state.credentials.set(key);
    if saved {
        state.notifier.notify(
            "API Key Saved",
            "Your Gemini API key has been saved",
            ToastVariant::Default,
        );
    } else {
        state.notifier.notify(
            "API Key Not Saved",
            "The key will be used until the server stops, but it could not be written to disk",
            ToastVariant::Destructive,
        );
    }
    Ok(Json(CredentialResponse { saved }))
}

pub async fn retry_handler(
    State(state): State<AppState>,
) -> std::result::Result<StatusCode, ApiError> {
    send_command(&state, RenderCommand::Retry).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn document_handler(State(state): State<AppState>) -> Response {
    match state.context.current() {
        Some(document) => (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
                (HeaderName::from_static(CYCLE_HEADER), document.cycle.to_string()),
            ],
            document.html,
        )
            .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "No preview document yet").into_response(),
    }
}

pub async fn events_handler(
    State(state): State<AppState>,
    Json(event): Json<ContextEvent>,
) -> std::result::Result<StatusCode, ApiError> {
    state.events.send(event).await.map_err(|_| renderer_stopped())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn source_handler(State(state): State<AppState>) -> Response {
    match state.session.current_source() {
        Some(source) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            source,
        )
            .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "No code has been generated yet").into_response(),
    }
}

pub async fn download_handler(State(state): State<AppState>) -> Response {
    match state.session.current_source() {
        Some(source) => (
            [
                (header::CONTENT_TYPE, "text/javascript; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", DOWNLOAD_FILE_NAME),
                ),
            ],
            source,
        )
            .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "No code has been generated yet").into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/credential", post(credential_handler))
        .route("/api/retry", post(retry_handler))
        .route("/api/document", get(document_handler))
        .route("/api/events", post(events_handler))
        .route("/api/source", get(source_handler))
        .route("/api/source/download", get(download_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the preview server until the process is stopped.
pub async fn serve(
    config: &Config,
    credentials: Arc<CredentialStore>,
    bind: &str,
    model: &str,
) -> Result<()> {
    let notifier = Arc::new(MemoryNotifier::new(TOAST_CAPACITY));
    let generator = build_generator(config, credentials.clone(), notifier.clone());
    let state = AppState::spawn(config, credentials, notifier, generator, model);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("pagecraft preview server running on http://{}", listener.local_addr()?);
    if config.is_mock_mode() {
        info!("Mock mode: generation uses canned responses");
    }

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryCredentialBackend;
    use crate::error::Result as PreviewResult;
    use crate::llm_generator::{GenerationResult, MockGenerator};
    use crate::renderer::ContextEventKind;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use std::time::Duration;

    /// Generator that never answers in test time.
    struct StalledGenerator {
        notifier: Arc<MemoryNotifier>,
    }

    #[async_trait]
    impl CodeGenerator for StalledGenerator {
        async fn try_generate_code(
            &self,
            _request: &GenerationRequest,
        ) -> PreviewResult<GenerationResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(crate::error::PreviewError::EmptyGeneration)
        }

        fn notifier(&self) -> &dyn Notifier {
            self.notifier.as_ref()
        }
    }

    fn state_with(
        key: Option<&str>,
        generator: impl FnOnce(Arc<MemoryNotifier>) -> Arc<dyn CodeGenerator>,
    ) -> AppState {
        let notifier = Arc::new(MemoryNotifier::new(TOAST_CAPACITY));
        let credentials = Arc::new(CredentialStore::new(
            key.map(str::to_string),
            Box::new(MemoryCredentialBackend::default()),
            None,
        ));
        let generator = generator(notifier.clone());
        AppState::spawn(&Config::default(), credentials, notifier, generator, "gemini-1.5-pro")
    }

    fn state(key: Option<&str>) -> AppState {
        state_with(key, |notifier| Arc::new(MockGenerator::new(notifier)))
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn generate(state: &AppState, prompt: &str) -> GenerateResponse {
        let Json(response) = generate_handler(
            State(state.clone()),
            Json(GenerateRequest {
                prompt: prompt.to_string(),
                model: None,
            }),
        )
        .await
        .unwrap();
        response
    }

    #[test]
    fn test_served_context_keeps_latest_document() {
        let mut context = ServedContext::default();
        assert!(context.current().is_none());
        context.write_document(1, "<p>one</p>").unwrap();
        context.write_document(2, "<p>two</p>").unwrap();
        assert_eq!(
            context.current(),
            Some(ServedDocument {
                cycle: 2,
                html: "<p>two</p>".into()
            })
        );
    }

    #[tokio::test]
    async fn test_generate_writes_document_for_host_page() {
        let state = state(Some("key"));
        let mut status = state.status.clone();

        let response = generate(&state, "a button").await;
        assert_eq!(response.status, "rendering");

        let snapshot = status
            .wait_for(|s| s.status == "loading")
            .await
            .unwrap()
            .clone();
        let served = state.context.current().unwrap();
        assert_eq!(served.cycle, snapshot.cycle);
        assert!(served.html.contains(r#"name: "Btn", strategy: "export-default""#));

        let response = document_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CYCLE_HEADER).unwrap(),
            &snapshot.cycle.to_string()
        );
    }

    #[tokio::test]
    async fn test_load_event_completes_render() {
        let state = state(Some("key"));
        let mut status = state.status.clone();
        generate(&state, "a counter").await;
        let cycle = status.wait_for(|s| s.status == "loading").await.unwrap().cycle;

        events_handler(
            State(state.clone()),
            Json(ContextEvent {
                cycle,
                kind: ContextEventKind::Loaded { error_marker: false },
            }),
        )
        .await
        .unwrap();

        status.wait_for(|s| s.status == "rendered").await.unwrap();
        let Json(report) = status_handler(State(state.clone())).await;
        assert_eq!(report.render.status, "rendered");
        assert!(!report.generating);
        assert!(report.has_api_key);
    }

    #[tokio::test]
    async fn test_error_then_retry_rewrites_same_document() {
        let state = state(Some("key"));
        let mut status = state.status.clone();
        generate(&state, "something broken").await;
        let cycle = status.wait_for(|s| s.status == "loading").await.unwrap().cycle;
        let first = state.context.current().unwrap();

        state
            .events
            .send(ContextEvent {
                cycle,
                kind: ContextEventKind::Loaded { error_marker: true },
            })
            .await
            .unwrap();
        status.wait_for(|s| s.status == "error").await.unwrap();

        assert_eq!(retry_handler(State(state.clone())).await.unwrap(), StatusCode::ACCEPTED);
        let retried = status
            .wait_for(|s| s.status == "loading" && s.cycle > cycle)
            .await
            .unwrap()
            .cycle;
        let second = state.context.current().unwrap();
        assert_eq!(second.cycle, retried);
        assert_eq!(second.html, first.html);
    }

    #[tokio::test]
    async fn test_cancelled_generate_request_clears_generating_flag() {
        let state = state_with(Some("key"), |notifier| {
            Arc::new(StalledGenerator { notifier })
        });

        let request = tokio::spawn(generate_handler(
            State(state.clone()),
            Json(GenerateRequest {
                prompt: "a button".into(),
                model: None,
            }),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let Json(report) = status_handler(State(state.clone())).await;
        assert!(report.generating);

        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        let Json(report) = status_handler(State(state.clone())).await;
        assert!(!report.generating);
        assert_eq!(report.render.status, "idle");
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let state = state(Some("key"));
        let err = generate_handler(
            State(state),
            Json(GenerateRequest {
                prompt: "   ".into(),
                model: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_source_and_download() {
        let state = state(Some("key"));
        let response = source_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        generate(&state, "a button").await;

        let source = body_text(source_handler(State(state.clone())).await).await;
        assert!(source.contains("function Btn()"));

        let response = download_handler(State(state.clone())).await;
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"generated-app.jsx\""
        );
        assert_eq!(body_text(response).await, source);
    }

    #[tokio::test]
    async fn test_credential_handler_saves_and_notifies() {
        let state = state(None);
        assert!(!state.credentials.is_set());

        let Json(response) = credential_handler(
            State(state.clone()),
            Json(CredentialRequest {
                api_key: "new-key".into(),
            }),
        )
        .await
        .unwrap();

        assert!(response.saved);
        assert_eq!(state.credentials.get(), "new-key");
        let toasts = state.notifier.toasts();
        assert_eq!(toasts.last().unwrap().title, "API Key Saved");
    }

    #[tokio::test]
    async fn test_index_serves_host_page() {
        let state = state(Some("key"));
        let Html(page) = index_handler(State(state)).await;
        assert!(page.contains(r#"id="frame""#));
        assert!(page.contains("gemini-1.5-pro"));
    }
}
