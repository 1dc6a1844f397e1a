use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{error, warn};
use uuid::Uuid;

use pawsquare_db::models::PetRow;
use pawsquare_types::api::{
    Claims, CreatePetRequest, PetPhotoResponse, PetResponse, UpdatePetRequest,
};

use crate::auth::AppState;
use crate::moderation::caller_is_moderator;
use crate::util::{parse_id, parse_timestamp};

/// Photo uploads beyond this are rejected outright.
const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

pub async fn create_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePetRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.trim().is_empty() || req.species.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let pet_id = Uuid::new_v4();
    state
        .db
        .insert_pet(
            &pet_id.to_string(),
            &claims.sub.to_string(),
            req.name.trim(),
            req.species.trim(),
            req.breed.as_deref(),
            req.birthdate.as_deref(),
            req.bio.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(PetResponse {
            id: pet_id,
            owner_id: claims.sub,
            name: req.name.trim().to_string(),
            species: req.species.trim().to_string(),
            breed: req.breed,
            birthdate: req.birthdate,
            bio: req.bio,
            created_at: chrono::Utc::now(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PetListQuery {
    /// Defaults to the caller's own pets.
    pub owner: Option<Uuid>,
}

pub async fn list_pets(
    State(state): State<AppState>,
    Query(query): Query<PetListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let owner = query.owner.unwrap_or(claims.sub);

    let db = state.db.clone();
    let oid = owner.to_string();
    let rows = tokio::task::spawn_blocking(move || db.get_pets_by_owner(&oid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let pets: Vec<PetResponse> = rows.into_iter().map(to_pet_response).collect();
    Ok(Json(pets))
}

pub async fn get_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let pet = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(to_pet_response(pet)))
}

pub async fn update_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePetRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let pet = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if pet.owner_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .update_pet(
            &pet_id.to_string(),
            req.name.as_deref(),
            req.species.as_deref(),
            req.breed.as_deref(),
            req.birthdate.as_deref(),
            req.bio.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let updated = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(to_pet_response(updated)))
}

pub async fn delete_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let pet = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if pet.owner_id != claims.sub.to_string() && !caller_is_moderator(&state, claims.sub)? {
        return Err(StatusCode::FORBIDDEN);
    }

    // Photo files go first; rows go with the pet in one transaction
    let photos = state
        .db
        .get_pet_photos(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    for photo in &photos {
        if let Err(e) = state.storage.remove(&photo.id).await {
            warn!("failed to remove photo file {}: {}", photo.id, e);
        }
    }

    state
        .db
        .delete_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

// -- Photo gallery --

#[derive(Debug, Deserialize)]
pub struct PhotoUploadQuery {
    pub caption: Option<String>,
}

/// `POST /pets/{id}/photos` with a raw image body.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Query(query): Query<PhotoUploadQuery>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let pet = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if pet.owner_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("image/") {
        return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if body.len() > MAX_PHOTO_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let photo_id = Uuid::new_v4();
    let sha256 = state
        .storage
        .save(&photo_id.to_string(), &body)
        .await
        .map_err(|e| {
            error!("failed to store photo {}: {}", photo_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let path = state
        .storage
        .file_path(&photo_id.to_string())
        .to_string_lossy()
        .into_owned();
    state
        .db
        .insert_pet_photo(
            &photo_id.to_string(),
            &pet_id.to_string(),
            &path,
            &content_type,
            &sha256,
            query.caption.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(PetPhotoResponse {
            id: photo_id,
            pet_id,
            url: format!("/media/{photo_id}"),
            caption: query.caption,
            created_at: chrono::Utc::now(),
        }),
    ))
}

pub async fn list_photos(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let rows = state
        .db
        .get_pet_photos(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let photos: Vec<PetPhotoResponse> = rows
        .into_iter()
        .map(|row| PetPhotoResponse {
            id: parse_id(&row.id, "pet photo"),
            pet_id: parse_id(&row.pet_id, "pet photo pet"),
            url: format!("/media/{}", row.id),
            caption: row.caption,
            created_at: parse_timestamp(&row.created_at, "pet photo"),
        })
        .collect();

    Ok(Json(photos))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path((pet_id, photo_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let pet = state
        .db
        .get_pet(&pet_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if pet.owner_id != claims.sub.to_string() && !caller_is_moderator(&state, claims.sub)? {
        return Err(StatusCode::FORBIDDEN);
    }

    let photo = state
        .db
        .get_pet_photo(&photo_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if photo.pet_id != pet_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }

    if let Err(e) = state.storage.remove(&photo.id).await {
        warn!("failed to remove photo file {}: {}", photo.id, e);
    }
    state
        .db
        .delete_pet_photo(&photo.id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /media/{photo_id}` — stream the stored file.
pub async fn serve_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Response, StatusCode> {
    let photo = state
        .db
        .get_pet_photo(&photo_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let file = state
        .storage
        .open(&photo.id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let response = (
        [(header::CONTENT_TYPE, photo.content_type)],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();
    Ok(response)
}

fn to_pet_response(row: PetRow) -> PetResponse {
    PetResponse {
        id: parse_id(&row.id, "pet"),
        owner_id: parse_id(&row.owner_id, "pet owner"),
        name: row.name,
        species: row.species,
        breed: row.breed,
        birthdate: row.birthdate,
        bio: row.bio,
        created_at: parse_timestamp(&row.created_at, "pet"),
    }
}
