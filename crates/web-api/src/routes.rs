use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use application::services::{
    ActivatePresenceRequest, BlockChatRequest, CreateChatWindowRequest, UpdateLocationRequest,
};
use domain::{ChatRestriction, ChatWindow, ChatWindowId, NearbyMatch, PresenceRecord, UserId};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivatePayload {
    latitude: Option<f64>,
    longitude: Option<f64>,
    radius: Option<f64>,
    availability_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateLocationPayload {
    latitude: Option<f64>,
    longitude: Option<f64>,
    radius: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatWindowPayload {
    #[serde(default)]
    participant_ids: Vec<String>,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockChatPayload {
    #[serde(default)]
    chat_window_id: String,
    #[serde(default)]
    restricted_by: String,
    #[serde(default)]
    restriction_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSocketQuery {
    chat_window_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeactivateResponse {
    message: &'static str,
    expired: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route(
            "/users/proximity/{user_id}",
            post(activate_proximity).patch(update_proximity),
        )
        .route("/users/proximity/off/{user_id}", post(deactivate_proximity))
        .route("/users/proximity/nearby/{user_id}", get(nearby_users))
        .route("/proximities/active", get(active_proximities))
        .route("/chat/ws/{user_id}", get(chat_socket))
        .route("/chat/window", post(create_chat_window))
        .route("/chat/window/{user_id}", get(list_chat_windows))
        .route("/chat/block", post(block_chat))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "pong" }))
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "请求体解析失败");
            Err(ApiError::bad_request("Cannot parse JSON"))
        }
    }
}

async fn activate_proximity(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<ActivatePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<PresenceRecord>), ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let payload = parse_body(body)?;
    let record = state
        .proximity_manager
        .activate(ActivatePresenceRequest {
            user_id,
            availability_id: payload.availability_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            radius: payload.radius,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_proximity(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<UpdateLocationPayload>, JsonRejection>,
) -> Result<Json<PresenceRecord>, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let payload = parse_body(body)?;
    let record = state
        .proximity_manager
        .update_location(UpdateLocationRequest {
            user_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            radius: payload.radius,
        })
        .await?;

    Ok(Json(record))
}

async fn deactivate_proximity(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let expired = state.proximity_manager.deactivate(user_id).await?;

    Ok(Json(DeactivateResponse {
        message: "Proximity turned off",
        expired,
    }))
}

async fn nearby_users(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<NearbyMatch>>, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let matches = state.proximity_manager.nearby(user_id).await?;
    Ok(Json(matches))
}

async fn active_proximities(
    State(state): State<AppState>,
) -> Result<Json<Vec<PresenceRecord>>, ApiError> {
    let records = state.proximity_manager.list_active().await?;
    Ok(Json(records))
}

/// 聊天窗口实时连接；ID 在升级前校验，失败直接返回 400。
async fn chat_socket(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ChatSocketQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let chat_window_id = ChatWindowId::parse(query.chat_window_id.as_deref().unwrap_or_default())?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let relay = state.relay.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::open(socket, relay, user_id, chat_window_id)
            .await
            .run()
            .await;
    }))
}

async fn create_chat_window(
    State(state): State<AppState>,
    body: Result<Json<CreateChatWindowPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatWindow>), ApiError> {
    let payload = parse_body(body)?;
    let window = state
        .chat_window_service
        .create_window(CreateChatWindowRequest {
            participant_ids: payload.participant_ids,
            is_group: payload.is_group,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(window)))
}

async fn list_chat_windows(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ChatWindow>>, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let windows = state.chat_window_service.list_for_user(user_id).await?;
    Ok(Json(windows))
}

async fn block_chat(
    State(state): State<AppState>,
    body: Result<Json<BlockChatPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatRestriction>), ApiError> {
    let payload = parse_body(body)?;
    let restriction = state
        .chat_window_service
        .block_chat(BlockChatRequest {
            chat_window_id: payload.chat_window_id,
            restricted_by: payload.restricted_by,
            restriction_type: payload.restriction_type,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(restriction)))
}
