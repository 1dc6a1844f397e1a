mod retention;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pawsquare_api::auth::{self, AppState, AppStateInner};
use pawsquare_api::middleware::require_auth;
use pawsquare_api::storage::Storage;
use pawsquare_api::{
    comments, conversations, follows, moderation, notifications, pets, posts, profiles,
};
use pawsquare_assistant::{AssistantState, CorsConfig, proxy};
use pawsquare_realtime::{PresenceHub, connection};
use pawsquare_types::api::Claims;
use pawsquare_types::models::Role;

#[derive(Clone)]
struct GatewayState {
    app: AppState,
    hub: PresenceHub,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pawsquare=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PAWSQUARE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PAWSQUARE_DB_PATH").unwrap_or_else(|_| "pawsquare.db".into());
    let host = std::env::var("PAWSQUARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PAWSQUARE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let media_dir = std::env::var("PAWSQUARE_MEDIA_DIR").unwrap_or_else(|_| "media".into());
    let gateway_url = std::env::var("PAWSQUARE_AI_GATEWAY_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into());
    let api_key = std::env::var("PAWSQUARE_AI_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("PAWSQUARE_AI_API_KEY is not set; assistant requests will fail upstream");
    }
    let retention_hours: u64 = std::env::var("PAWSQUARE_USAGE_RETENTION_HOURS")
        .unwrap_or_else(|_| "24".into())
        .parse()?;

    // Init database and media storage
    let db = Arc::new(pawsquare_db::Database::open(&PathBuf::from(&db_path))?);
    let storage = Storage::new(PathBuf::from(&media_dir)).await?;

    // Optional bootstrap: grant the admin role to a known username
    if let Ok(admin) = std::env::var("PAWSQUARE_ADMIN_USER") {
        match db.get_user_by_username(&admin)? {
            Some(user) => db.add_role(&user.id, Role::Admin.as_str())?,
            None => warn!("PAWSQUARE_ADMIN_USER '{}' does not exist yet", admin),
        }
    }

    // Shared state
    let hub = PresenceHub::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        hub: hub.clone(),
        storage,
    });
    let assistant_state = Arc::new(AssistantState {
        db: db.clone(),
        http: reqwest::Client::new(),
        jwt_secret: jwt_secret.clone(),
        gateway_url,
        api_key,
        cors: CorsConfig::from_env(),
    });
    let gateway_state = GatewayState {
        app: app_state.clone(),
        hub: hub.clone(),
        jwt_secret: jwt_secret.clone(),
    };

    // Usage log retention runs off the request path
    tokio::spawn(retention::run_usage_retention_loop(
        db.clone(),
        retention_hours,
        3600,
    ));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/profiles/me", get(profiles::get_me).put(profiles::update_me))
        .route("/profiles/{user_id}", get(profiles::get_profile))
        .route("/posts", post(posts::create_post).get(posts::get_feed))
        .route("/posts/{post_id}", get(posts::get_post).delete(posts::delete_post))
        .route("/posts/{post_id}/like", post(posts::toggle_like))
        .route("/posts/{post_id}/bookmark", post(posts::toggle_bookmark))
        .route("/bookmarks", get(posts::get_bookmarks))
        .route(
            "/posts/{post_id}/comments",
            post(comments::create_comment).get(comments::get_comments),
        )
        .route(
            "/posts/{post_id}/comments/{comment_id}",
            delete(comments::delete_comment),
        )
        .route("/users/{user_id}/follow", post(follows::toggle_follow))
        .route("/users/{user_id}/followers", get(follows::get_followers))
        .route("/users/{user_id}/following", get(follows::get_following))
        .route("/pets", post(pets::create_pet).get(pets::list_pets))
        .route(
            "/pets/{pet_id}",
            get(pets::get_pet).put(pets::update_pet).delete(pets::delete_pet),
        )
        .route(
            "/pets/{pet_id}/photos",
            post(pets::upload_photo).get(pets::list_photos),
        )
        .route(
            "/pets/{pet_id}/photos/{photo_id}",
            delete(pets::delete_photo),
        )
        .route("/media/{photo_id}", get(pets::serve_photo))
        .route(
            "/conversations",
            post(conversations::open_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route(
            "/reports",
            post(moderation::create_report).get(moderation::list_reports),
        )
        .route("/reports/{report_id}/resolve", post(moderation::resolve_report))
        .route("/reports/{report_id}/dismiss", post(moderation::dismiss_report))
        .route(
            "/moderation/bans",
            post(moderation::create_ban).get(moderation::list_bans),
        )
        .route("/moderation/bans/{user_id}", delete(moderation::remove_ban))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let assistant_route = Router::new()
        .route(
            "/functions/v1/pet-care-assistant",
            post(proxy::chat).options(proxy::preflight),
        )
        .with_state(assistant_state);

    // The assistant route computes its own per-request CORS headers and must
    // sit outside the permissive layer.
    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .merge(assistant_route)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("PawSquare server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    /// Browsers cannot set headers on WebSocket requests, so the JWT rides
    /// in the query string.
    token: String,
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token_data = match decode::<Claims>(
        &params.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let claims = token_data.claims;
    match state.app.db.is_banned(&claims.sub.to_string()) {
        Ok(false) => {}
        Ok(true) => return StatusCode::FORBIDDEN.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.hub, claims.sub, claims.username)
    })
    .into_response()
}
