use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;

use skillswap_db::now_rfc3339;
use skillswap_gateway::{ApiError, ChatAccess};
use skillswap_types::api::{Claims, ReactionView, ToggleReactionRequest};

use crate::AppState;
use crate::exchanges::blocking;

const MAX_EMOJI_CHARS: usize = 16;

/// Toggle the caller's `(emoji)` reaction on a message. Reacting is a write:
/// only accepted exchanges allow it. Adding after a prior remove re-sorts
/// the reaction to the end of the display order.
pub async fn toggle(
    State(state): State<AppState>,
    Path((exchange_id, message_id)): Path<(i64, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() {
        return Err(ApiError::Validation("emoji is required".into()));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ApiError::Validation("emoji is too long".into()));
    }

    state
        .chat
        .authorize(exchange_id, claims.sub, ChatAccess::Write)
        .await?;

    let db = state.chat.db.clone();
    let user_id = claims.sub;
    let (added, reactions) = blocking(move || {
        let message = db
            .get_message(message_id)?
            .ok_or_else(|| ApiError::NotFound("Message not found".into()))?;
        if message.exchange_id != exchange_id {
            return Err(ApiError::NotFound("Message not found".into()));
        }

        let added = db.toggle_reaction(message_id, user_id, &emoji, &now_rfc3339())?;
        let reactions: Vec<ReactionView> = db
            .reactions_for_messages(&[message_id])?
            .into_iter()
            .map(|r| ReactionView { emoji: r.emoji, user_id: r.user_id })
            .collect();
        Ok((added, reactions))
    })
    .await?;

    Ok(Json(json!({ "success": true, "added": added, "reactions": reactions })))
}
