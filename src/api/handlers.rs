use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::authorizer::bearer_token;
use crate::errors::AppError;
use crate::models::{AddTokenParams, AddUserParams, Token, User};
use crate::AppState;

// ── Helpers ──────────────────────────────────────────────────

/// Bodies are decoded by hand so that the admin check in front of these
/// handlers always runs before any parsing.
fn decode<T: DeserializeOwned>(body: &Bytes, what: &str) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("{}: undecodable body: {}", what, e);
        AppError::BadRequest(format!("error decoding parameters for {}: {}", what, e))
    })
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        tracing::warn!("{}: invalid UUID: {}", what, raw);
        AppError::BadRequest(format!("unable to decode '{}' as an id", raw))
    })
}

// ── Users ────────────────────────────────────────────────────

/// GET /users — every user with its tokens
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, AppError> {
    let users = state.store.list_users().await?;
    Ok(Json(users))
}

/// GET /users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<User>, AppError> {
    let id = parse_id(&id_str, "get_user")?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or(AppError::NotFound { kind: "user", id })?;
    Ok(Json(user))
}

/// POST /users — body `{"name": ..., "username": ...}`, returns the new id
pub async fn add_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Uuid>, AppError> {
    let params: AddUserParams = decode(&body, "adding user")?;
    let id = state.issuer.add_user(bearer_token(&headers), params).await?;
    Ok(Json(id))
}

/// DELETE /users/:id — removes the user and all of its tokens
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> Result<(), AppError> {
    let id = parse_id(&id_str, "delete_user")?;
    state.issuer.delete_user(bearer_token(&headers), id).await
}

// ── Tokens ───────────────────────────────────────────────────

/// GET /tokens
pub async fn list_tokens(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Token>>, AppError> {
    let tokens = state.store.list_tokens().await?;
    Ok(Json(tokens))
}

/// GET /tokens/:id
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<Token>, AppError> {
    let id = parse_id(&id_str, "get_token")?;
    let token = state
        .store
        .get_token(id)
        .await?
        .ok_or(AppError::NotFound { kind: "token", id })?;
    Ok(Json(token))
}

/// POST /tokens — body `{"userId": ..., "scope": ..., "validFrom"?: ..., "validUntil"?: ...}`
pub async fn add_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Uuid>, AppError> {
    let params: AddTokenParams = decode(&body, "adding token")?;
    let id = state.issuer.add_token(bearer_token(&headers), params).await?;
    Ok(Json(id))
}

/// DELETE /tokens/:id
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> Result<(), AppError> {
    let id = parse_id(&id_str, "delete_token")?;
    state.issuer.delete_token(bearer_token(&headers), id).await
}
