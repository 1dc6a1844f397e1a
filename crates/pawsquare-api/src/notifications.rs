use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use pawsquare_types::api::{Claims, NotificationKind, NotificationResponse, UserSummary};
use pawsquare_types::events::RealtimeEvent;

use crate::auth::{AppState, AppStateInner};
use crate::util::{parse_id, parse_timestamp};

/// Record a notification and push it to the recipient's live connection if
/// there is one. Best-effort: failures are logged, never surfaced to the
/// request that triggered the notification.
pub(crate) async fn notify(
    state: &AppStateInner,
    recipient: Uuid,
    actor: &Claims,
    kind: NotificationKind,
    post_id: Option<Uuid>,
) {
    let id = Uuid::new_v4();
    let inserted = state.db.insert_notification(
        &id.to_string(),
        &recipient.to_string(),
        &actor.sub.to_string(),
        kind.as_str(),
        post_id.map(|p| p.to_string()).as_deref(),
    );
    if let Err(e) = inserted {
        warn!("failed to record {} notification: {}", kind.as_str(), e);
        return;
    }

    state
        .hub
        .send_to_user(
            recipient,
            RealtimeEvent::NotificationCreate {
                id,
                kind,
                actor_id: actor.sub,
                actor_username: actor.username.clone(),
                post_id,
                created_at: chrono::Utc::now(),
            },
        )
        .await;
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.get_notifications(&uid, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("notification query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let notifications: Vec<NotificationResponse> = rows
        .into_iter()
        .filter_map(|row| {
            // Unknown kinds are skipped rather than failing the whole list
            let kind = NotificationKind::parse(&row.kind)?;
            Some(NotificationResponse {
                id: parse_id(&row.id, "notification"),
                kind,
                actor: UserSummary {
                    user_id: parse_id(&row.actor_id, "notification actor"),
                    username: row.actor_username,
                    display_name: row.actor_display_name,
                    avatar_url: row.actor_avatar_url,
                },
                post_id: row.post_id.as_deref().map(|p| parse_id(p, "notification post")),
                read: row.read,
                created_at: parse_timestamp(&row.created_at, "notification"),
            })
        })
        .collect();

    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .db
        .mark_notification_read(&id.to_string(), &claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .db
        .mark_all_notifications_read(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}
