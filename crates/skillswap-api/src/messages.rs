use std::collections::HashMap;
use std::path::Path as FsPath;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use skillswap_gateway::chat::MAX_BODY_CHARS;
use skillswap_gateway::{ApiError, ChatAccess, ChatContext, NewAttachment};
use skillswap_types::api::{ChatMessage, Claims, ConversationView, Pagination, SendMessageRequest};

use crate::AppState;
use crate::exchanges::blocking;

/// Upload size cap, enforced on the collected file payload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    30
}

pub async fn list(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, 50);
    let (messages, total) = state
        .chat
        .list(exchange_id, claims.sub, limit, query.offset)
        .await?;

    Ok(Json(json!({
        "success": true,
        "messages": messages,
        "pagination": Pagination { limit, offset: query.offset, total },
    })))
}

pub async fn send(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.chat.send(exchange_id, claims.sub, &req.body, None).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "message": message }))))
}

/// Multipart send: a required `file` part plus an optional `body` text part.
/// The file lands on disk as `chat_{uuid}{ext}` under the upload dir and is
/// served back at `/uploads/{filename}`.
pub async fn upload(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Gate before touching the disk.
    state
        .chat
        .authorize(exchange_id, claims.sub, ChatAccess::Write)
        .await?;

    let mut body = String::new();
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "body" => {
                body = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("invalid body field: {e}")))?;
            }
            "file" => {
                let original_name = field.file_name().unwrap_or("file").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("invalid file field: {e}")))?;
                file = Some((original_name, mime_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (original_name, mime_type, bytes) =
        file.ok_or_else(|| ApiError::Validation("file is required".into()))?;

    let message = store_and_send(
        &state.chat,
        &state.upload_dir,
        exchange_id,
        claims.sub,
        &body,
        &original_name,
        &mime_type,
        bytes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "message": message }))))
}

/// Persist the payload under the upload dir and send the attachment message.
/// The body is validated before anything touches the disk, and a send that
/// fails after the write removes the file again so nothing is orphaned.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn store_and_send(
    chat: &ChatContext,
    upload_dir: &FsPath,
    exchange_id: i64,
    user_id: i64,
    body: &str,
    original_name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<ChatMessage, ApiError> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::Validation("File exceeds the 10MB limit".into()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::Validation("body is too long".into()));
    }

    let ext = FsPath::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let filename = format!("chat_{}{ext}", Uuid::new_v4());
    let size_bytes = bytes.len() as i64;

    let disk_path = upload_dir.join(&filename);
    tokio::fs::write(&disk_path, bytes).await.map_err(|e| {
        error!("failed to store upload at {}: {}", disk_path.display(), e);
        ApiError::Internal(anyhow::anyhow!("writing upload {}: {e}", disk_path.display()))
    })?;

    let attachment = NewAttachment {
        url: format!("/uploads/{filename}"),
        mime_type: mime_type.to_string(),
        original_name: original_name.to_string(),
        size_bytes,
    };

    match chat.send(exchange_id, user_id, body, Some(attachment)).await {
        Ok(message) => Ok(message),
        Err(err) => {
            // The message never persisted; don't leave the file behind.
            let _ = tokio::fs::remove_file(&disk_path).await;
            Err(err)
        }
    }
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.chat.mark_read(exchange_id, claims.sub).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

/// `GET /exchanges/chats`: one row per open exchange the caller is in, with
/// the latest message and the caller's unread count, most recent activity
/// first.
pub async fn conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let user_id = claims.sub;

    let conversations = blocking(move || {
        let rows = db.list_open_exchanges_for_user(user_id)?;
        let exchange_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        let mut user_ids: Vec<i64> = rows
            .iter()
            .flat_map(|r| [r.requester_id, r.owner_id])
            .collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let names = db.user_names(&user_ids)?;

        let skill_ids: Vec<i64> = rows
            .iter()
            .flat_map(|r| [r.skill_offered_id, r.skill_requested_id])
            .flatten()
            .collect();
        let titles: HashMap<i64, String> = db
            .skills_by_ids(&skill_ids)?
            .into_iter()
            .map(|s| (s.id, s.title))
            .collect();

        let last = db.last_message_per_exchange(&exchange_ids)?;
        let unread = db.unread_counts(&exchange_ids, user_id)?;

        let mut views: Vec<ConversationView> = rows
            .into_iter()
            .map(|row| {
                let other_user_id = row.other_participant(user_id);
                let (last_body, last_at) = match last.get(&row.id) {
                    Some((body, at)) => (Some(cipher.decrypt(body)), Some(at.clone())),
                    None => (None, None),
                };
                ConversationView {
                    id: row.id,
                    status: row.effective_status(),
                    requester_id: row.requester_id,
                    owner_id: row.owner_id,
                    requester_name: names.get(&row.requester_id).cloned().unwrap_or_default(),
                    owner_name: names.get(&row.owner_id).cloned().unwrap_or_default(),
                    requested_title: row
                        .skill_requested_id
                        .and_then(|id| titles.get(&id).cloned()),
                    offered_title: row
                        .skill_offered_id
                        .and_then(|id| titles.get(&id).cloned()),
                    other_user_id,
                    other_user_name: names.get(&other_user_id).cloned().unwrap_or_default(),
                    last_body,
                    last_at,
                    unread_count: unread.get(&row.id).copied().unwrap_or(0),
                    created_at: row.created_at,
                }
            })
            .collect();

        // Most recent activity first; an exchange with no messages sorts by
        // its creation time.
        views.sort_by(|a, b| {
            let a_key = a.last_at.as_deref().unwrap_or(&a.created_at);
            let b_key = b.last_at.as_deref().unwrap_or(&b.created_at);
            b_key.cmp(a_key)
        });
        Ok(views)
    })
    .await?;

    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use skillswap_crypto::TextCipher;
    use skillswap_db::{Database, now_rfc3339};
    use skillswap_gateway::Dispatcher;

    fn chat_fixture(accept: bool) -> (ChatContext, i64, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "").unwrap();
        let exchange_id = db
            .create_exchange(alice, bob, "", &[guitar], &[sketching], &now_rfc3339())
            .unwrap();
        if accept {
            db.accept_exchange(exchange_id, guitar, sketching).unwrap();
        }
        let chat = ChatContext::new(db, TextCipher::disabled(), Dispatcher::new());
        (chat, exchange_id, alice)
    }

    fn temp_upload_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("skillswap-upload-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn dir_is_empty(dir: &FsPath) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn successful_upload_links_file_and_message() {
        let (chat, exchange_id, alice) = chat_fixture(true);
        let dir = temp_upload_dir();

        let message = store_and_send(
            &chat, &dir, exchange_id, alice, "here you go", "riff.png", "image/png",
            vec![1, 2, 3],
        )
        .await
        .unwrap();

        assert_eq!(message.attachments.len(), 1);
        let url = &message.attachments[0].url;
        assert!(url.starts_with("/uploads/chat_"), "got: {url}");
        assert!(url.ends_with(".png"), "got: {url}");

        let filename = url.strip_prefix("/uploads/").unwrap();
        assert!(dir.join(filename).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn oversized_body_never_reaches_disk() {
        let (chat, exchange_id, alice) = chat_fixture(true);
        let dir = temp_upload_dir();

        let body = "x".repeat(MAX_BODY_CHARS + 1);
        let err = store_and_send(
            &chat, &dir, exchange_id, alice, &body, "riff.png", "image/png", vec![1],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Validation(_)));
        assert!(dir_is_empty(&dir));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn rejected_send_removes_the_stored_file() {
        // Pending exchange: the write gate fails after the file has landed,
        // so the file must be cleaned up again.
        let (chat, exchange_id, alice) = chat_fixture(false);
        let dir = temp_upload_dir();

        let err = store_and_send(
            &chat, &dir, exchange_id, alice, "sneak peek", "riff.png", "image/png", vec![1],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::InvalidState(_)));
        assert!(dir_is_empty(&dir));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
