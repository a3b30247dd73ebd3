use std::path::PathBuf;
use std::sync::Arc;

use skillswap_gateway::ChatContext;

pub mod exchanges;
pub mod feedback;
pub mod messages;
pub mod middleware;
pub mod ratings;
pub mod reactions;

pub struct AppStateInner {
    pub chat: ChatContext,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
}

pub type AppState = Arc<AppStateInner>;
