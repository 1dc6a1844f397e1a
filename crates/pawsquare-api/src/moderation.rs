use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use pawsquare_types::api::{
    BanResponse, Claims, CreateBanRequest, CreateReportRequest, ReportResponse, ReportStatus,
    ReportTargetKind,
};

use crate::auth::AppState;
use crate::util::{parse_id, parse_timestamp};

const MAX_REASON_LEN: usize = 1000;

/// Moderator-or-admin check for handlers that allow staff overrides.
pub(crate) fn caller_is_moderator(state: &AppState, user_id: Uuid) -> Result<bool, StatusCode> {
    state.db.is_moderator(&user_id.to_string()).map_err(|e| {
        error!("role lookup failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn require_moderator(state: &AppState, claims: &Claims) -> Result<(), StatusCode> {
    if caller_is_moderator(state, claims.sub)? {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

// -- Reports --

/// Any authenticated user can file a report.
pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let reason = req.reason.trim().to_string();
    if reason.is_empty() || reason.len() > MAX_REASON_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    // The reported target must exist
    let target = req.target_id.to_string();
    let exists = match req.target_kind {
        ReportTargetKind::Post => state.db.get_post(&target).map(|p| p.is_some()),
        ReportTargetKind::Comment => state.db.get_comment(&target).map(|c| c.is_some()),
        ReportTargetKind::User => state.db.get_user_by_id(&target).map(|u| u.is_some()),
    }
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let report_id = Uuid::new_v4();
    state
        .db
        .insert_report(
            &report_id.to_string(),
            &claims.sub.to_string(),
            req.target_kind.as_str(),
            &target,
            &reason,
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(ReportResponse {
            id: report_id,
            reporter_id: claims.sub,
            target_kind: req.target_kind,
            target_id: req.target_id,
            reason,
            status: ReportStatus::Open,
            created_at: chrono::Utc::now(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub status: Option<ReportStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_moderator(&state, &claims)?;

    let db = state.db.clone();
    let status = query.status.map(|s| s.as_str());
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.get_reports(status, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let reports: Vec<ReportResponse> = rows
        .into_iter()
        .filter_map(|row| {
            let target_kind = ReportTargetKind::parse(&row.target_kind)?;
            let status = ReportStatus::parse(&row.status)?;
            Some(ReportResponse {
                id: parse_id(&row.id, "report"),
                reporter_id: parse_id(&row.reporter_id, "report reporter"),
                target_kind,
                target_id: parse_id(&row.target_id, "report target"),
                reason: row.reason,
                status,
                created_at: parse_timestamp(&row.created_at, "report"),
            })
        })
        .collect();

    Ok(Json(reports))
}

pub async fn resolve_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    set_status(&state, &claims, report_id, ReportStatus::Resolved)
}

pub async fn dismiss_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    set_status(&state, &claims, report_id, ReportStatus::Dismissed)
}

fn set_status(
    state: &AppState,
    claims: &Claims,
    report_id: Uuid,
    status: ReportStatus,
) -> Result<StatusCode, StatusCode> {
    require_moderator(state, claims)?;

    let updated = state
        .db
        .set_report_status(&report_id.to_string(), status.as_str())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

// -- Bans --

pub async fn create_ban(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBanRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_moderator(&state, &claims)?;

    if req.user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }
    let reason = req.reason.trim().to_string();
    if reason.is_empty() || reason.len() > MAX_REASON_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let target = state
        .db
        .get_user_by_id(&req.user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // Staff cannot be banned; demote first
    if caller_is_moderator(&state, req.user_id)? {
        return Err(StatusCode::BAD_REQUEST);
    }

    let expires_at = req
        .expires_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());
    state
        .db
        .ban_user(
            &req.user_id.to_string(),
            &reason,
            &claims.sub.to_string(),
            expires_at.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(BanResponse {
            user_id: req.user_id,
            username: target.username,
            reason,
            issued_by: claims.sub,
            expires_at: req.expires_at,
            created_at: chrono::Utc::now(),
        }),
    ))
}

pub async fn remove_ban(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_moderator(&state, &claims)?;

    let removed = state
        .db
        .unban_user(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_bans(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_moderator(&state, &claims)?;

    let rows = state
        .db
        .get_bans()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let bans: Vec<BanResponse> = rows
        .into_iter()
        .map(|row| BanResponse {
            user_id: parse_id(&row.user_id, "ban"),
            username: row.username,
            reason: row.reason,
            issued_by: parse_id(&row.issued_by, "ban issuer"),
            expires_at: row
                .expires_at
                .as_deref()
                .map(|t| parse_timestamp(t, "ban expiry")),
            created_at: parse_timestamp(&row.created_at, "ban"),
        })
        .collect();

    Ok(Json(bans))
}
