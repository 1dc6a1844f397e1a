use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use pawsquare_db::models::MessageRow;
use pawsquare_types::api::{
    Claims, ConversationResponse, DirectMessageResponse, NotificationKind,
    OpenConversationRequest, SendDirectMessageRequest, UserSummary,
};
use pawsquare_types::events::RealtimeEvent;

use crate::auth::AppState;
use crate::notifications::notify;
use crate::util::{parse_id, parse_timestamp};

const MAX_MESSAGE_LEN: usize = 2000;

/// `POST /conversations` — find or create the two-party conversation with a
/// peer. At most one conversation exists per unordered user pair.
pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.peer_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state
        .db
        .get_user_by_id(&req.peer_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let db = state.db.clone();
    let me = claims.sub.to_string();
    let peer = req.peer_id.to_string();

    let conversation =
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<ConversationResponse>> {
            let id = match db.find_conversation_between(&me, &peer)? {
                Some(id) => id,
                None => {
                    let id = Uuid::new_v4().to_string();
                    db.create_conversation(&id, &me, &peer)?;
                    id
                }
            };
            // Re-read through the listing query so the peer summary and
            // timestamps come from one place.
            let row = db
                .get_user_conversations(&me)?
                .into_iter()
                .find(|c| c.id == id);
            let Some(row) = row else { return Ok(None) };
            let last = db.get_last_messages(&[id])?.pop();
            Ok(Some(to_conversation_response(row, last)))
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("conversation open failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();

    let conversations =
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<ConversationResponse>> {
            let rows = db.get_user_conversations(&me)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut last_by_conversation: HashMap<String, MessageRow> = db
                .get_last_messages(&ids)?
                .into_iter()
                .map(|m| (m.conversation_id.clone(), m))
                .collect();

            Ok(rows
                .into_iter()
                .map(|row| {
                    let last = last_by_conversation.remove(&row.id);
                    to_conversation_response(row, last)
                })
                .collect())
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(conversations))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if !state
        .db
        .is_participant(&conversation_id.to_string(), &claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || db.get_messages(&cid, limit, before.as_deref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<DirectMessageResponse> =
        rows.into_iter().map(to_message_response).collect();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDirectMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    if !state
        .db
        .is_participant(&conversation_id.to_string(), &claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    {
        return Err(StatusCode::FORBIDDEN);
    }

    let message_id = Uuid::new_v4();

    // Run blocking DB insert off the async runtime
    let db = state.db.clone();
    let mid = message_id.to_string();
    let cid = conversation_id.to_string();
    let sid = claims.sub.to_string();
    let body = content.clone();
    tokio::task::spawn_blocking(move || db.insert_message(&mid, &cid, &sid, &body))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let now = chrono::Utc::now();

    // Push to the other participant's live connection, then notify
    let peer = state
        .db
        .get_conversation_peer(&conversation_id.to_string(), &claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|p| parse_id(&p, "conversation peer"));

    if let Some(peer) = peer {
        state
            .hub
            .send_to_user(
                peer,
                RealtimeEvent::MessageCreate {
                    id: message_id,
                    conversation_id,
                    sender_id: claims.sub,
                    sender_username: claims.username.clone(),
                    content: content.clone(),
                    created_at: now,
                },
            )
            .await;
        notify(&state, peer, &claims, NotificationKind::Message, None).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(DirectMessageResponse {
            id: message_id,
            conversation_id,
            sender_id: claims.sub,
            sender_username: claims.username.clone(),
            content,
            created_at: now,
        }),
    ))
}

fn to_conversation_response(
    row: pawsquare_db::models::ConversationRow,
    last: Option<MessageRow>,
) -> ConversationResponse {
    ConversationResponse {
        id: parse_id(&row.id, "conversation"),
        peer: UserSummary {
            user_id: parse_id(&row.peer_id, "conversation peer"),
            username: row.peer_username,
            display_name: row.peer_display_name,
            avatar_url: row.peer_avatar_url,
        },
        last_message: last.map(to_message_response),
        created_at: parse_timestamp(&row.created_at, "conversation"),
    }
}

fn to_message_response(row: MessageRow) -> DirectMessageResponse {
    DirectMessageResponse {
        id: parse_id(&row.id, "message"),
        conversation_id: parse_id(&row.conversation_id, "message conversation"),
        sender_id: parse_id(&row.sender_id, "message sender"),
        sender_username: row.sender_username,
        content: row.content,
        created_at: parse_timestamp(&row.created_at, "message"),
    }
}
