use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use skillswap_api::middleware::require_auth;
use skillswap_api::{AppState, AppStateInner, exchanges, feedback, messages, ratings, reactions};
use skillswap_crypto::TextCipher;
use skillswap_gateway::{ChatContext, Dispatcher, connection};

#[derive(Clone)]
struct ServerState {
    chat: ChatContext,
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
                .unwrap_or_else(|_| "skillswap=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("SKILLSWAP_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("SKILLSWAP_DB_PATH").unwrap_or_else(|_| "skillswap.db".into());
    let host = std::env::var("SKILLSWAP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SKILLSWAP_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let upload_dir =
        PathBuf::from(std::env::var("SKILLSWAP_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()));

    let cipher = match std::env::var("SKILLSWAP_TEXT_KEY") {
        Ok(raw) => TextCipher::new(skillswap_crypto::keys::key_from_str(&raw)?),
        Err(_) => {
            warn!("SKILLSWAP_TEXT_KEY not set, message bodies are stored in plaintext");
            TextCipher::disabled()
        }
    };

    std::fs::create_dir_all(&upload_dir)?;

    // Init database
    let db = Arc::new(skillswap_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let chat = ChatContext::new(db, cipher, dispatcher);
    let app_state: AppState = Arc::new(AppStateInner {
        chat: chat.clone(),
        jwt_secret: jwt_secret.clone(),
        upload_dir: upload_dir.clone(),
    });

    let state = ServerState { chat, jwt_secret };

    // Routes
    let protected_routes = Router::new()
        .route("/exchanges", post(exchanges::create))
        .route("/exchanges", get(exchanges::list))
        .route("/exchanges/learning", get(exchanges::learning))
        .route("/exchanges/teaching", get(exchanges::teaching))
        .route("/exchanges/chats", get(messages::conversations))
        .route("/exchanges/{id}/respond", patch(exchanges::respond))
        .route("/exchanges/{id}/complete", patch(exchanges::complete).post(exchanges::complete))
        .route("/exchanges/{id}/messages", get(messages::list))
        .route("/exchanges/{id}/messages", post(messages::send))
        .route(
            "/exchanges/{id}/messages/upload",
            post(messages::upload).layer(DefaultBodyLimit::max(messages::MAX_UPLOAD_BYTES + 64 * 1024)),
        )
        .route("/exchanges/{id}/messages/read", post(messages::mark_read))
        .route(
            "/exchanges/{id}/messages/{message_id}/reactions",
            post(reactions::toggle),
        )
        .route("/exchanges/{id}/feedback", get(feedback::list))
        .route("/exchanges/{id}/feedback", post(feedback::submit))
        .route("/skills/{id}/reputation", get(ratings::skill_reputation))
        .route("/skills/{id}/usage", get(ratings::skill_usage))
        .route("/users/{id}/reputation", get(ratings::user_reputation))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Skillswap server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.chat, state.jwt_secret))
}
