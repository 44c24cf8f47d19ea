use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use charla_channels::Channel;
use charla_common::{Error, Identity, Settings, SettingsPatch, StoredMessage};

use crate::state::SharedState;

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Build the application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(web_chat))
        .route("/health", get(health))
        .route("/api/messages", post(send_message).delete(clear_all_messages))
        .route(
            "/api/messages/{username}",
            get(get_messages).delete(clear_messages),
        )
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/whatsapp/auth", post(whatsapp_auth))
        .route("/api/whatsapp/connect", post(whatsapp_connect))
        .route("/api/whatsapp/disconnect", post(whatsapp_disconnect))
        .route("/api/whatsapp/status", get(whatsapp_status))
        .route("/api/whatsapp/qr", get(whatsapp_qr))
        .route("/api/whatsapp/send", post(whatsapp_send))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn error_response(error: &Error) -> ApiError {
    let status = match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Channel(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

async fn health() -> &'static str {
    "ok"
}

async fn web_chat() -> Html<String> {
    // Hot-reload during local development if the source file is present
    if let Ok(content) = std::fs::read_to_string("crates/charla-gateway/src/webchat.html") {
        return Html(content);
    }

    Html(include_str!("webchat.html").to_string())
}

#[derive(Deserialize)]
struct ChatRequest {
    content: String,
    username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    user_message: StoredMessage,
    ai_message: StoredMessage,
}

/// POST /api/messages — run one conversation turn and return both sides.
async fn send_message(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let identity = Identity::from_web(&req.username).map_err(|e| error_response(&e))?;
    let outcome = state
        .engine
        .handle_turn(&identity, &req.content)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(ChatResponse {
        user_message: outcome.user_message,
        ai_message: outcome.assistant_message,
    }))
}

/// GET /api/messages/{username} — full ordered history for one identity.
async fn get_messages(
    State(state): State<SharedState>,
    Path(username): Path<String>,
) -> Json<Vec<StoredMessage>> {
    let store = state.history.lock().await;
    Json(store.read_all(&username))
}

/// DELETE /api/messages/{username} — clear one identity's history.
async fn clear_messages(
    State(state): State<SharedState>,
    Path(username): Path<String>,
) -> Json<serde_json::Value> {
    let mut store = state.history.lock().await;
    store.clear(&username);
    Json(json!({ "success": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearAllRequest {
    admin_password: String,
}

/// DELETE /api/messages — administrative bulk clear, password-gated.
async fn clear_all_messages(
    State(state): State<SharedState>,
    Json(req): Json<ClearAllRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.admin_password != state.settings.current().admin_password {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid admin password" })),
        ));
    }

    info!("clearing all conversation history (admin request)");
    let mut store = state.history.lock().await;
    store.clear_all();
    Ok(Json(json!({ "success": true })))
}

async fn get_settings(State(state): State<SharedState>) -> Json<Settings> {
    Json(state.settings.current())
}

async fn update_settings(
    State(state): State<SharedState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<Settings> {
    Json(state.settings.update(patch))
}

#[derive(Deserialize)]
struct AuthRequest {
    username: String,
    password: String,
}

/// POST /api/auth/register — create a web login account.
async fn register(
    State(state): State<SharedState>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<charla_db::User>, ApiError> {
    let identity = Identity::from_web(&req.username).map_err(|e| error_response(&e))?;
    if req.password.trim().is_empty() {
        return Err(error_response(&Error::Validation(
            "password must not be empty".into(),
        )));
    }

    let users = state.users.lock().await;
    let user = users
        .create(&identity.key, &req.password)
        .map_err(|e| error_response(&e))?;
    Ok(Json(user))
}

/// POST /api/auth/login — verify a web login.
async fn login(
    State(state): State<SharedState>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<charla_db::User>, ApiError> {
    let users = state.users.lock().await;
    match users
        .verify_login(req.username.trim(), &req.password)
        .map_err(|e| error_response(&e))?
    {
        Some(user) => Ok(Json(user)),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid username or password" })),
        )),
    }
}

#[derive(Deserialize)]
struct WhatsAppAuthRequest {
    password: String,
}

/// POST /api/whatsapp/auth — gate for the admin panel.
async fn whatsapp_auth(
    State(state): State<SharedState>,
    Json(req): Json<WhatsAppAuthRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.password == state.settings.current().admin_password {
        Ok(Json(json!({ "success": true })))
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid admin password" })),
        ))
    }
}

async fn whatsapp_connect(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut channel = state.whatsapp.lock().await;
    channel.connect().await.map_err(|e| error_response(&e))?;
    Ok(Json(json!({ "success": true })))
}

async fn whatsapp_disconnect(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut channel = state.whatsapp.lock().await;
    channel.disconnect().await.map_err(|e| error_response(&e))?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/whatsapp/status — connection panel state.
async fn whatsapp_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let channel = state.whatsapp.lock().await;
    let status = channel.status();
    Json(json!({
        "isReady": status.is_ready(),
        "isConnecting": status.is_connecting(),
        "hasQR": channel.qr_code().is_some(),
    }))
}

/// GET /api/whatsapp/qr — current pairing QR code, if any.
async fn whatsapp_qr(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let channel = state.whatsapp.lock().await;
    Json(json!({ "qrCode": channel.qr_code() }))
}

#[derive(Deserialize)]
struct SendRequest {
    number: String,
    message: String,
}

/// POST /api/whatsapp/send — manual outbound message from the admin panel.
async fn whatsapp_send(
    State(state): State<SharedState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.number.trim().is_empty() || req.message.trim().is_empty() {
        return Err(error_response(&Error::Validation(
            "number and message must not be empty".into(),
        )));
    }

    let channel = state.whatsapp.lock().await;
    channel
        .send_text(req.number.trim(), &req.message)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!({ "success": true })))
}
