//! User handlers: create, list, get, update, delete.
//!
//! Writes run inside [`crate::db::Client::with_tx`] and raise their events
//! from after-commit hooks, so handlers only ever observe committed rows.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::api::dto::{
    CreateUserRequest, PaginationParams, UpdateUserRequest, UserDto, UserListResponse,
};
use crate::api::middleware::RequestScope;
use crate::app_state::AppState;
use crate::args;
use crate::db::{BoxError, Client};
use crate::error::AppError;
use crate::events::{Event, EventManager, names, user_cache_key};

const USER_COLUMNS: &str = "id, email, name, profile, created_at";

/// Queues `event` for dispatch once the surrounding transaction commits.
fn raise_after_commit(tx: &Client, events: Arc<EventManager>, event: Event) {
    tx.after_commit(move |client| async move {
        events.dispatch_from(&client, event).await;
        Ok::<(), BoxError>(())
    });
}

/// `POST /users` — Register a user.
///
/// # Errors
///
/// Returns [`AppError::InvalidRequest`] on bad input and
/// [`AppError::Conflict`] when the email is taken.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (email, name) = req.validated()?;
    let profile = req.profile;
    let events = Arc::clone(&state.events);

    let user = scope
        .client
        .with_tx(move |tx| async move {
            let user: UserDto = tx
                .query_row(
                    &format!(
                        "INSERT INTO users (id, email, name, profile) \
                         VALUES ($1, $2, $3, $4::jsonb) RETURNING {USER_COLUMNS}"
                    ),
                    &args![Uuid::new_v4(), email, name, profile],
                )
                .await?;
            let payload = json!({
                "id": user.id,
                "email": user.email,
                "name": user.name,
                "profile": user.profile,
            });
            raise_after_commit(&tx, events, Event::new(names::USER_REGISTERED, payload));
            Ok::<_, AppError>(user)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /users` — List users, newest first.
///
/// # Errors
///
/// Returns [`AppError::Database`] on storage failure.
pub async fn list_users(
    Extension(scope): Extension<RequestScope>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AppError> {
    let params = params.clamped();
    let (total,): (i64,) = scope
        .client
        .query_row("SELECT COUNT(*) FROM users", &[])
        .await?;
    let data: Vec<UserDto> = scope
        .client
        .query(
            &format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
            ),
            &args![i64::from(params.per_page), params.offset()],
        )
        .await?;

    Ok(Json(UserListResponse {
        data,
        pagination: params.meta(u32::try_from(total).unwrap_or(u32::MAX)),
    }))
}

/// `GET /users/{id}` — Fetch one user, read-through the cache.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] when no such user exists.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let key = user_cache_key(&id.to_string());
    if let Some(raw) = state.cache.get(&key).await
        && let Ok(user) = serde_json::from_str::<UserDto>(&raw)
    {
        return Ok(Json(user));
    }

    let user: UserDto = scope
        .client
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
            &args![id],
        )
        .await?;
    match serde_json::to_string(&user) {
        Ok(raw) => state.cache.set(&key, raw, Some(state.cache_ttl)).await,
        Err(err) => scope.logger.warn(
            "user not cached",
            Some(&json!({ "id": id, "error": err.to_string() })),
        ),
    }
    Ok(Json(user))
}

/// `PATCH /users/{id}` — Rename a user.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] when no such user exists.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = req.validated()?;
    let events = Arc::clone(&state.events);

    let user = scope
        .client
        .with_tx(move |tx| async move {
            let user: UserDto = tx
                .query_row(
                    &format!("UPDATE users SET name = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"),
                    &args![id, name],
                )
                .await?;
            let payload = json!({ "id": user.id, "name": user.name });
            raise_after_commit(&tx, events, Event::new(names::USER_UPDATED, payload));
            Ok::<_, AppError>(user)
        })
        .await?;

    Ok(Json(user))
}

/// `DELETE /users/{id}` — Remove a user.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] when no such user exists.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let events = Arc::clone(&state.events);

    scope
        .client
        .with_tx(move |tx| async move {
            let result = tx
                .exec("DELETE FROM users WHERE id = $1", &args![id])
                .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("user {id}")));
            }
            raise_after_commit(
                &tx,
                events,
                Event::new(names::USER_DELETED, json!({ "id": id })),
            );
            Ok(())
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// User routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
}
