//! JSON HTTP API over the chat core.
//!
//! Exposes the interaction cycle to browser or service clients: register,
//! log in for a session token, submit one message at a time, read back the
//! session view and the persisted history.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/register` | Create a user |
//! | `POST` | `/login` | Authenticate; returns a session token |
//! | `POST` | `/logout` | Discard the session for a token |
//! | `POST` | `/submit` | Submit one message; returns the reply and this login's turns |
//! | `GET`  | `/session/{token}` | Login state plus this login's display turns |
//! | `GET`  | `/history/{token}` | Full persisted log for the session's user |
//!
//! # Error Contract
//!
//! Error responses are JSON:
//!
//! ```json
//! { "error": { "code": "invalid_credentials", "message": "invalid username or password" } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_credentials` (401),
//! `unknown_session` (401), `username_taken` (409), `internal` (500).
//!
//! Sessions live in process memory and die with the server; the persisted
//! log survives. Submissions for one session are serialized by a
//! per-session mutex; distinct sessions proceed independently.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::auth::CredentialStore;
use crate::config::Config;
use crate::db;
use crate::error::ChatError;
use crate::model;
use crate::models::Message;
use crate::session::Session;
use crate::store::MessageStore;

type SessionMap = Arc<Mutex<HashMap<String, Arc<Mutex<Session>>>>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: MessageStore,
    users: CredentialStore,
    sessions: SessionMap,
}

/// Start the HTTP server on the configured bind address.
///
/// Fails fast if the store cannot be opened or the model provider is not
/// usable (e.g. missing API key) — no partial startup.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;

    // Validate the provider before serving; handles are created per login
    model::create_model(&config.model)?;

    let state = AppState {
        config: Arc::new(config.clone()),
        store: MessageStore::new(pool.clone()),
        users: CredentialStore::new(pool),
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/logout", post(handle_logout))
        .route("/submit", post(handle_submit))
        .route("/session/{token}", get(handle_session))
        .route("/history/{token}", get(handle_history))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    println!("Chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"invalid_credentials"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn invalid_credentials() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "invalid_credentials".to_string(),
        message: ChatError::InvalidCredentials.to_string(),
    }
}

fn unknown_session() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unknown_session".to_string(),
        message: "no session for this token; log in first".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map a core error onto the HTTP taxonomy. Domain variants pick their
/// status; validation messages become 400; the rest is a 500.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(domain) = err.downcast_ref::<ChatError>() {
        return match domain {
            ChatError::UsernameTaken(_) => AppError {
                status: StatusCode::CONFLICT,
                code: "username_taken".to_string(),
                message: err.to_string(),
            },
            ChatError::InvalidCredentials => invalid_credentials(),
        };
    }

    let msg = err.to_string();
    if msg.contains("must not be empty") {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /register ============

#[derive(Deserialize)]
struct CredentialsBody {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    username: String,
}

async fn handle_register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<RegisterResponse>, AppError> {
    state
        .users
        .register(&body.username, &body.password)
        .await
        .map_err(classify_error)?;

    Ok(Json(RegisterResponse {
        username: body.username,
    }))
}

// ============ POST /login ============

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    username: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<LoginResponse>, AppError> {
    let ok = state
        .users
        .authenticate(&body.username, &body.password)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if !ok {
        return Err(invalid_credentials());
    }

    let model = model::create_model(&state.config.model).map_err(|e| internal(e.to_string()))?;
    let session = Session::open(
        &body.username,
        state.store.clone(),
        model,
        state.config.retrieval.clone(),
    );

    let token = Uuid::new_v4().to_string();
    state
        .sessions
        .lock()
        .await
        .insert(token.clone(), Arc::new(Mutex::new(session)));

    Ok(Json(LoginResponse {
        token,
        username: body.username,
    }))
}

// ============ POST /logout ============

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

async fn handle_logout(
    State(state): State<AppState>,
    Json(body): Json<TokenBody>,
) -> Json<serde_json::Value> {
    let removed = state.sessions.lock().await.remove(&body.token).is_some();
    Json(serde_json::json!({ "logged_out": removed }))
}

// ============ POST /submit ============

#[derive(Deserialize)]
struct SubmitBody {
    token: String,
    text: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    reply: String,
    turns: Vec<Message>,
}

async fn handle_submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, AppError> {
    let session = state
        .sessions
        .lock()
        .await
        .get(&body.token)
        .cloned()
        .ok_or_else(unknown_session)?;

    // One submission at a time per session
    let mut session = session.lock().await;
    let reply = session.submit(&body.text).await.map_err(classify_error)?;

    Ok(Json(SubmitResponse {
        reply,
        turns: session.turns().to_vec(),
    }))
}

// ============ GET /session/{token} ============

#[derive(Serialize)]
struct SessionResponse {
    logged_in: bool,
    username: Option<String>,
    turns: Vec<Message>,
}

async fn handle_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<SessionResponse> {
    let session = state.sessions.lock().await.get(&token).cloned();

    match session {
        Some(session) => {
            let session = session.lock().await;
            Json(SessionResponse {
                logged_in: true,
                username: Some(session.username().to_string()),
                turns: session.turns().to_vec(),
            })
        }
        None => Json(SessionResponse {
            logged_in: false,
            username: None,
            turns: Vec::new(),
        }),
    }
}

// ============ GET /history/{token} ============

#[derive(Serialize)]
struct HistoryResponse {
    username: String,
    messages: Vec<Message>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state
        .sessions
        .lock()
        .await
        .get(&token)
        .cloned()
        .ok_or_else(unknown_session)?;

    let username = session.lock().await.username().to_string();
    let messages = state
        .store
        .history(&username)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(HistoryResponse { username, messages }))
}
