use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use pawsquare_db::Database;
use pawsquare_types::api::{Claims, ProfileResponse, UpdateProfileRequest};

use crate::auth::AppState;
use crate::util::{parse_id, parse_timestamp};

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    fetch_profile(state, claims.sub).await
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    fetch_profile(state, user_id).await
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.display_name.as_deref().is_some_and(|n| n.len() > 80)
        || req.bio.as_deref().is_some_and(|b| b.len() > 500)
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .upsert_profile(
            &claims.sub.to_string(),
            req.display_name.as_deref(),
            req.bio.as_deref(),
            req.avatar_url.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    fetch_profile(state, claims.sub).await
}

async fn fetch_profile(state: AppState, user_id: Uuid) -> Result<Json<ProfileResponse>, StatusCode> {
    let db = state.db.clone();
    let uid = user_id.to_string();

    let profile = tokio::task::spawn_blocking(move || load_profile(&db, &uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(profile))
}

fn load_profile(db: &Database, user_id: &str) -> anyhow::Result<Option<ProfileResponse>> {
    let Some(row) = db.get_profile(user_id)? else {
        return Ok(None);
    };

    Ok(Some(ProfileResponse {
        user_id: parse_id(&row.user_id, "profile"),
        username: row.username,
        display_name: row.display_name,
        bio: row.bio,
        avatar_url: row.avatar_url,
        follower_count: db.count_followers(user_id)?,
        following_count: db.count_following(user_id)?,
        created_at: parse_timestamp(&row.created_at, "profile"),
    }))
}
