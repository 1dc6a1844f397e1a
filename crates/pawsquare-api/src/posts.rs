use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use pawsquare_db::Database;
use pawsquare_db::models::PostRow;
use pawsquare_types::api::{
    Claims, CreatePostRequest, NotificationKind, PostResponse, ToggleResponse,
};

use crate::auth::AppState;
use crate::moderation::caller_is_moderator;
use crate::notifications::notify;
use crate::util::{parse_id, parse_timestamp};

const MAX_POST_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest post from the previous page to fetch older posts.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_POST_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let post_id = Uuid::new_v4();

    let db = state.db.clone();
    let pid = post_id.to_string();
    let aid = claims.sub.to_string();
    let body = content.clone();
    let image_url = req.image_url.clone();
    tokio::task::spawn_blocking(move || db.insert_post(&pid, &aid, &body, image_url.as_deref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: post_id,
            author_id: claims.sub,
            author_username: claims.username.clone(),
            content,
            image_url: req.image_url,
            created_at: chrono::Utc::now(),
            like_count: 0,
            comment_count: 0,
            liked_by_me: false,
            bookmarked_by_me: false,
        }),
    ))
}

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let limit = query.limit.min(100);
    let before = query.before;

    let posts = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PostResponse>> {
        let rows = db.get_posts(limit, before.as_deref())?;
        hydrate_posts(&db, &uid, rows)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("feed query failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(posts))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let pid = post_id.to_string();

    let post = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<PostResponse>> {
        let Some(row) = db.get_post(&pid)? else {
            return Ok(None);
        };
        Ok(hydrate_posts(&db, &uid, vec![row])?.pop())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(post))
}

/// Authors delete their own posts; moderators delete anything.
pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let post = state
        .db
        .get_post(&post_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if post.author_id != claims.sub.to_string() && !caller_is_moderator(&state, claims.sub)? {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .delete_post(&post_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let post = state
        .db
        .get_post(&post_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let like_id = Uuid::new_v4();
    let active = state
        .db
        .toggle_like(
            &like_id.to_string(),
            &post_id.to_string(),
            &claims.sub.to_string(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // No notification for un-liking or liking your own post
    let author_id = parse_id(&post.author_id, "post author");
    if active && author_id != claims.sub {
        notify(&state, author_id, &claims, NotificationKind::Like, Some(post_id)).await;
    }

    Ok(Json(ToggleResponse { active }))
}

pub async fn toggle_bookmark(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if state
        .db
        .get_post(&post_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let bookmark_id = Uuid::new_v4();
    let active = state
        .db
        .toggle_bookmark(
            &bookmark_id.to_string(),
            &post_id.to_string(),
            &claims.sub.to_string(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ToggleResponse { active }))
}

pub async fn get_bookmarks(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();

    let posts = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PostResponse>> {
        let rows = db.get_bookmarked_posts(&uid, 100)?;
        hydrate_posts(&db, &uid, rows)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(posts))
}

/// Attach like/comment counts and the caller's own like/bookmark flags with
/// batch queries (no per-post lookups).
pub(crate) fn hydrate_posts(
    db: &Database,
    user_id: &str,
    rows: Vec<PostRow>,
) -> anyhow::Result<Vec<PostResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let like_counts: HashMap<String, i64> = db.count_likes_for_posts(&ids)?.into_iter().collect();
    let comment_counts: HashMap<String, i64> =
        db.count_comments_for_posts(&ids)?.into_iter().collect();
    let liked: HashSet<String> = db.get_liked_post_ids(user_id, &ids)?.into_iter().collect();
    let bookmarked: HashSet<String> =
        db.get_bookmarked_post_ids(user_id, &ids)?.into_iter().collect();

    Ok(rows
        .into_iter()
        .map(|row| PostResponse {
            id: parse_id(&row.id, "post"),
            author_id: parse_id(&row.author_id, "post author"),
            author_username: row.author_username,
            content: row.content,
            image_url: row.image_url,
            created_at: parse_timestamp(&row.created_at, "post"),
            like_count: like_counts.get(&row.id).copied().unwrap_or(0),
            comment_count: comment_counts.get(&row.id).copied().unwrap_or(0),
            liked_by_me: liked.contains(&row.id),
            bookmarked_by_me: bookmarked.contains(&row.id),
        })
        .collect())
}
