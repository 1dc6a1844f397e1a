use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use pawsquare_db::models::UserSummaryRow;
use pawsquare_types::api::{Claims, NotificationKind, ToggleResponse, UserSummary};

use crate::auth::AppState;
use crate::notifications::notify;
use crate::util::parse_id;

pub async fn toggle_follow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let follow_id = Uuid::new_v4();
    let active = state
        .db
        .toggle_follow(
            &follow_id.to_string(),
            &claims.sub.to_string(),
            &user_id.to_string(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if active {
        notify(&state, user_id, &claims, NotificationKind::Follow, None).await;
    }

    Ok(Json(ToggleResponse { active }))
}

pub async fn get_followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.get_followers(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(to_summaries(rows)))
}

pub async fn get_following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.get_following(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(to_summaries(rows)))
}

fn to_summaries(rows: Vec<UserSummaryRow>) -> Vec<UserSummary> {
    rows.into_iter()
        .map(|row| UserSummary {
            user_id: parse_id(&row.id, "user"),
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        })
        .collect()
}
