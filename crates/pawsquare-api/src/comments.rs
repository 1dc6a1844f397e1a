use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use pawsquare_types::api::{Claims, CommentResponse, CreateCommentRequest, NotificationKind};

use crate::auth::AppState;
use crate::moderation::caller_is_moderator;
use crate::notifications::notify;
use crate::util::{parse_id, parse_timestamp};

const MAX_COMMENT_LEN: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_COMMENT_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let post = state
        .db
        .get_post(&post_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let comment_id = Uuid::new_v4();
    state
        .db
        .insert_comment(
            &comment_id.to_string(),
            &post_id.to_string(),
            &claims.sub.to_string(),
            &content,
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let author_id = parse_id(&post.author_id, "post author");
    if author_id != claims.sub {
        notify(&state, author_id, &claims, NotificationKind::Comment, Some(post_id)).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: comment_id,
            post_id,
            author_id: claims.sub,
            author_username: claims.username.clone(),
            content,
            created_at: chrono::Utc::now(),
        }),
    ))
}

pub async fn get_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<CommentQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let pid = post_id.to_string();
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.get_comments(&pid, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let comments: Vec<CommentResponse> = rows
        .into_iter()
        .map(|row| CommentResponse {
            id: parse_id(&row.id, "comment"),
            post_id: parse_id(&row.post_id, "comment post"),
            author_id: parse_id(&row.author_id, "comment author"),
            author_username: row.author_username,
            content: row.content,
            created_at: parse_timestamp(&row.created_at, "comment"),
        })
        .collect();

    Ok(Json(comments))
}

/// Authors delete their own comments; moderators delete anything.
pub async fn delete_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let comment = state
        .db
        .get_comment(&comment_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if comment.post_id != post_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }
    if comment.author_id != claims.sub.to_string() && !caller_is_moderator(&state, claims.sub)? {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .delete_comment(&comment_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}
