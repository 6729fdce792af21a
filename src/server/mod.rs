//! Bridge HTTP server.
//!
//! Owns the whole request lifecycle: CORS headers, the OPTIONS
//! short-circuit, the localhost trust boundary, bearer authentication,
//! route dispatch, the error-to-status mapping, and the start/stop
//! lifecycle around the listener.
//!
//! # Endpoints
//!
//! - `POST /v1/chat` - Chat completion (native envelope)
//! - `POST /v1/chat/completions` - Chat completion (OpenAI-compatible)
//! - `GET /v1/models` - List available models
//! - `GET /health` - Health check
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lmbridge::config::BridgeConfig;
//! use lmbridge::provider::OllamaProvider;
//! use lmbridge::server::BridgeServer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = BridgeServer::new(
//!     Arc::new(BridgeConfig::default()),
//!     Arc::new(OllamaProvider::new()),
//! );
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::bridge::{self, ChatEnvelope};
use crate::config::{BridgeConfig, ConfigSource};
use crate::error::BridgeError;
use crate::provider::LanguageModelPort;
use crate::security;

/// Shared state behind every handler.
pub struct AppState {
    /// Configuration source, snapshotted fresh per request.
    pub config: Arc<dyn ConfigSource>,
    /// The chat-model provider.
    pub port: Arc<dyn LanguageModelPort>,
}

impl AppState {
    pub fn new(config: Arc<dyn ConfigSource>, port: Arc<dyn LanguageModelPort>) -> Self {
        Self { config, port }
    }
}

/// The config snapshot taken at the security gate, attached to the
/// request so every later stage reads the same values.
#[derive(Clone)]
struct ConfigSnapshot(BridgeConfig);

// =============================================================================
// Router
// =============================================================================

/// Build the router with all routes and the security gate.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Method routers get the same fallback so an unknown method on a
    // known path reports the endpoint as unknown instead of a bare 405.
    Router::new()
        .route("/health", get(health_handler).fallback(fallback_handler))
        .route("/v1/models", get(models_handler).fallback(fallback_handler))
        .route("/v1/chat", post(native_chat_handler).fallback(fallback_handler))
        .route(
            "/v1/chat/completions",
            post(compat_chat_handler).fallback(fallback_handler),
        )
        .fallback(fallback_handler)
        .layer(middleware::from_fn_with_state(state.clone(), security_gate))
        .with_state(state)
}

/// Security gate, run before any route.
///
/// Order is fixed: OPTIONS preflight short-circuits, then the loopback
/// check (before a single body byte is read), then bearer auth against a
/// fresh config snapshot. The snapshot rides along in the request
/// extensions; every response leaving here carries the CORS headers.
async fn security_gate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return with_cors(StatusCode::NO_CONTENT.into_response());
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    if !security::is_localhost(peer.as_deref()) {
        tracing::warn!(
            "Rejected non-localhost request from {}",
            peer.as_deref().unwrap_or("<unknown>")
        );
        return with_cors(error_response(
            StatusCode::FORBIDDEN,
            "Forbidden",
            Some("Only localhost requests are allowed".to_string()),
        ));
    }

    let config = state.config.snapshot();

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !security::validate_bearer_token(authorization, &config.token) {
        tracing::warn!("Rejected request with invalid or missing bearer token");
        return with_cors(error_response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            Some("Invalid or missing bearer token".to_string()),
        ));
    }

    req.extensions_mut().insert(ConfigSnapshot(config));

    with_cors(next.run(req).await)
}

/// Stamp the CORS headers onto a response.
fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

// =============================================================================
// Response Types
// =============================================================================

/// Error envelope shared by every failure status.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: &'static str,
    provider_status: String,
}

/// OpenAI-style chat completion response (compatibility path).
#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatChoice>,
    usage: UsageInfo,
}

#[derive(Serialize)]
struct ChatChoice {
    index: u32,
    message: AssistantMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct AssistantMessage {
    role: &'static str,
    content: String,
}

/// Usage placeholders. Token accounting is not implemented here.
#[derive(Serialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Reshape the native envelope into the OpenAI-compatible schema.
fn compat_completion(envelope: &ChatEnvelope) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: envelope.id.clone(),
        object: "chat.completion",
        created: envelope.meta.started_at.timestamp(),
        model: envelope.model.family.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content: envelope.output_text.clone(),
            },
            finish_reason: "stop",
        }],
        usage: UsageInfo {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Read, parse, and process a chat request body.
async fn run_chat(state: &AppState, req: Request) -> Result<ChatEnvelope, BridgeError> {
    let config = req
        .extensions()
        .get::<ConfigSnapshot>()
        .map(|snapshot| snapshot.0.clone())
        .unwrap_or_default();

    let body = security::read_body_with_limit(
        req.into_body().into_data_stream(),
        config.max_body_bytes,
    )
    .await?;

    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|_| BridgeError::validation("Invalid JSON payload"))?;

    bridge::process_chat(state.port.as_ref(), &payload).await
}

/// Chat handler, native envelope.
async fn native_chat_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    match run_chat(&state, req).await {
        Ok(envelope) => json_response(StatusCode::OK, &envelope),
        Err(err) => failure_response("Chat request", err),
    }
}

/// Chat handler, OpenAI-compatible envelope.
async fn compat_chat_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    match run_chat(&state, req).await {
        Ok(envelope) => json_response(StatusCode::OK, &compat_completion(&envelope)),
        Err(err) => failure_response("Chat request", err),
    }
}

/// List models handler.
async fn models_handler(State(state): State<Arc<AppState>>) -> Response {
    match bridge::list_models(state.port.as_ref()).await {
        Ok(payload) => json_response(StatusCode::OK, &payload),
        Err(err) => failure_response("Model listing", err),
    }
}

/// Health check handler.
///
/// Reports degraded status when the provider is unreachable.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let provider_status = if state.port.ping().await {
        "ok".to_string()
    } else {
        "unavailable".to_string()
    };

    let status = if provider_status == "ok" {
        "ok".to_string()
    } else {
        "degraded".to_string()
    };

    json_response(
        StatusCode::OK,
        &HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            provider_status,
        },
    )
}

/// Fallback for unknown routes.
async fn fallback_handler(req: Request) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "Not Found",
        Some(format!(
            "Unknown endpoint: {} {}",
            req.method(),
            req.uri().path()
        )),
    )
}

// =============================================================================
// Response Helpers
// =============================================================================

/// Pretty-printed JSON response with the proper content type.
fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| r#"{"error":"Internal Server Error"}"#.to_string());
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        Body::from(body),
    )
        .into_response()
}

/// JSON error envelope.
fn error_response(status: StatusCode, error: &str, details: Option<String>) -> Response {
    json_response(status, &ErrorBody { error, details })
}

/// Map a pipeline failure to its terminal response.
///
/// Client mistakes become 400 with the message as details; anything else
/// is logged with its cause chain and becomes 500.
fn failure_response(context: &str, err: BridgeError) -> Response {
    if err.is_client_error() {
        return error_response(StatusCode::BAD_REQUEST, "Bad Request", Some(err.message()));
    }

    match std::error::Error::source(&err) {
        Some(source) => tracing::error!("{} failed: {} (caused by: {})", context, err, source),
        None => tracing::error!("{} failed: {}", context, err),
    }
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        Some(err.message()),
    )
}

// =============================================================================
// Server Lifecycle
// =============================================================================

/// A started listener and the means to stop it.
struct RunningServer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The bridge server: holds shared state and at most one running
/// listener.
///
/// `start` and `stop` guard their own idempotency: starting a running
/// server or stopping a stopped one fails immediately without side
/// effects.
pub struct BridgeServer {
    state: Arc<AppState>,
    running: Mutex<Option<RunningServer>>,
}

impl BridgeServer {
    /// Create a server over a config source and a model port.
    pub fn new(config: Arc<dyn ConfigSource>, port: Arc<dyn LanguageModelPort>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, port)),
            running: Mutex::new(None),
        }
    }

    /// Start listening.
    ///
    /// The bind address is normalized to loopback first: anything without
    /// a loopback marker is overridden to `127.0.0.1`. A bind failure
    /// (e.g. port in use) leaves the server stopped.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            anyhow::bail!("Server is already running");
        }

        let config = self.state.config.snapshot();
        let bind_address = normalize_bind_address(&config.bind_address);
        // IPv6 literals need brackets to parse as a socket address.
        let addr = if bind_address.contains(':') {
            format!("[{}]:{}", bind_address, config.port)
        } else {
            format!("{}:{}", bind_address, config.port)
        };

        tracing::info!("Starting server on {}", addr);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    This usually means another lmbridge instance is running. \
                    Try stopping other instances or use a different port with: lmbridge serve --port <PORT>",
                    config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to read bound address: {}", e))?;

        let router = build_router(self.state.clone());
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });

            if let Err(e) = serve.await {
                tracing::error!("Server error: {}", e);
            }
        });

        *guard = Some(RunningServer {
            shutdown,
            handle,
            local_addr,
        });

        tracing::info!("Server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop a running server, waiting for in-flight requests to drain.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            anyhow::bail!("Server is not running");
        };

        let _ = running.shutdown.send(());
        let _ = running.handle.await;

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Whether a listener is currently up.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }
}

/// Force non-loopback bind addresses back to 127.0.0.1.
fn normalize_bind_address(addr: &str) -> String {
    const LOOPBACK_MARKERS: [&str; 3] = ["127.0.0.1", "localhost", "::1"];

    if LOOPBACK_MARKERS.iter().any(|marker| addr.contains(marker)) {
        addr.to_string()
    } else {
        tracing::warn!(
            "Configured bind address '{}' is not loopback; overriding to 127.0.0.1",
            addr
        );
        "127.0.0.1".to_string()
    }
}

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM on Unix, Ctrl+C elsewhere.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}
