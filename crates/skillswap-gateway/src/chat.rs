use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::error;

use skillswap_crypto::TextCipher;
use skillswap_db::models::{AttachmentRow, ExchangeRow, MessageRow, ReactionRow};
use skillswap_db::{Database, now_rfc3339};
use skillswap_types::api::{AttachmentView, ChatMessage, ReactionView};
use skillswap_types::events::ChatEvent;
use skillswap_types::models::ExchangeStatus;

use crate::dispatcher::Dispatcher;
use crate::error::ApiError;

/// Maximum chat body length, in characters.
pub const MAX_BODY_CHARS: usize = 2000;

/// What a caller wants to do with an exchange's chat thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAccess {
    /// Listing, mark-read, room join. Allowed while accepted or completed.
    Read,
    /// Sending and reacting. Allowed only while accepted; a completed
    /// thread is read-only.
    Write,
}

/// Attachment metadata for a message carrying a file, produced by the
/// upload collaborator.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub url: String,
    pub mime_type: String,
    pub original_name: String,
    pub size_bytes: i64,
}

/// The one shared implementation of chat writes and reads. Both the REST
/// handlers and the WebSocket command loop go through here, so the two
/// entry points cannot drift apart on authorization or state rules.
#[derive(Clone)]
pub struct ChatContext {
    pub db: Arc<Database>,
    pub cipher: TextCipher,
    pub dispatcher: Dispatcher,
}

impl ChatContext {
    pub fn new(db: Arc<Database>, cipher: TextCipher, dispatcher: Dispatcher) -> Self {
        Self { db, cipher, dispatcher }
    }

    /// Eligibility gate for every messaging operation: the caller must be a
    /// participant, and the exchange must be in a chat-eligible state.
    pub async fn authorize(
        &self,
        exchange_id: i64,
        user_id: i64,
        access: ChatAccess,
    ) -> Result<ExchangeRow, ApiError> {
        let db = self.db.clone();
        let exchange = tokio::task::spawn_blocking(move || db.get_exchange(exchange_id))
            .await
            .context("join blocking task")??
            .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;

        if !exchange.is_participant(user_id) {
            return Err(ApiError::Forbidden("Forbidden".into()));
        }
        if !exchange.status.chat_readable() {
            return Err(ApiError::InvalidState(
                "Chat is available after acceptance".into(),
            ));
        }
        if access == ChatAccess::Write && exchange.status != ExchangeStatus::Accepted {
            return Err(ApiError::InvalidState(
                "Chat is disabled after completion".into(),
            ));
        }

        Ok(exchange)
    }

    /// Persist a message and fan it out to the exchange's room. The body is
    /// trimmed and must be non-empty unless an attachment accompanies it.
    pub async fn send(
        &self,
        exchange_id: i64,
        from_user_id: i64,
        body: &str,
        attachment: Option<NewAttachment>,
    ) -> Result<ChatMessage, ApiError> {
        let text = body.trim().to_string();
        if text.is_empty() && attachment.is_none() {
            return Err(ApiError::Validation("body is required".into()));
        }
        if text.chars().count() > MAX_BODY_CHARS {
            return Err(ApiError::Validation("body is too long".into()));
        }

        let exchange = self.authorize(exchange_id, from_user_id, ChatAccess::Write).await?;
        let to_user_id = exchange.other_participant(from_user_id);

        let stored_body = if text.is_empty() {
            String::new()
        } else {
            self.cipher.encrypt(&text)
        };
        let stored_attachment = attachment.clone().map(|a| NewAttachment {
            original_name: self.cipher.encrypt(&a.original_name),
            ..a
        });

        let db = self.db.clone();
        let now = now_rfc3339();
        let insert_now = now.clone();
        let (message_id, attachment_id, from_name) =
            tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
                let message_id =
                    db.insert_message(exchange_id, from_user_id, to_user_id, &stored_body, &insert_now)?;
                let attachment_id = stored_attachment
                    .map(|a| {
                        db.insert_attachment(
                            message_id,
                            &a.url,
                            &a.mime_type,
                            &a.original_name,
                            a.size_bytes,
                        )
                    })
                    .transpose()?;
                let from_name = db.user_name(from_user_id)?.unwrap_or_default();
                Ok((message_id, attachment_id, from_name))
            })
            .await
            .context("join blocking task")??;

        let attachments = attachment
            .into_iter()
            .map(|a| AttachmentView {
                id: attachment_id.unwrap_or_default(),
                url: a.url,
                mime_type: a.mime_type,
                original_name: a.original_name,
                size_bytes: a.size_bytes,
            })
            .collect();

        let message = ChatMessage {
            id: message_id,
            exchange_id,
            from_user_id,
            from_name,
            to_user_id,
            body: text,
            delivered_at: now.clone(),
            read_at: None,
            created_at: now,
            attachments,
            reactions: vec![],
        };

        self.dispatcher
            .broadcast(
                exchange_id,
                ChatEvent::NewMessage {
                    exchange_id,
                    message: Box::new(message.clone()),
                },
            )
            .await;

        Ok(message)
    }

    /// Mark everything addressed to the caller as read and broadcast a read
    /// receipt if anything changed. Returns the number of rows updated.
    pub async fn mark_read(&self, exchange_id: i64, user_id: i64) -> Result<usize, ApiError> {
        self.authorize(exchange_id, user_id, ChatAccess::Read).await?;

        let db = self.db.clone();
        let now = now_rfc3339();
        let updated = tokio::task::spawn_blocking(move || db.mark_read(exchange_id, user_id, &now))
            .await
            .context("join blocking task")??;

        if updated > 0 {
            self.dispatcher
                .broadcast(exchange_id, ChatEvent::Read { exchange_id, user_id })
                .await;
        }

        Ok(updated)
    }

    /// One page of the thread, oldest first, decorated for display.
    /// Returns the page plus the total message count for pagination.
    pub async fn list(
        &self,
        exchange_id: i64,
        user_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ChatMessage>, i64), ApiError> {
        self.authorize(exchange_id, user_id, ChatAccess::Read).await?;

        let limit = limit.clamp(1, 50);
        let db = self.db.clone();
        let (rows, attachment_rows, reaction_rows, total) =
            tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
                let total = db.count_messages(exchange_id)?;
                let rows = db.list_messages(exchange_id, limit, offset)?;
                let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
                let attachments = db.attachments_for_messages(&ids)?;
                let reactions = db.reactions_for_messages(&ids)?;
                Ok((rows, attachments, reactions, total))
            })
            .await
            .context("join blocking task")??;

        Ok((self.decorate(rows, attachment_rows, reaction_rows), total))
    }

    /// Broadcast an ephemeral typing indicator. Never persisted.
    pub async fn typing(&self, exchange_id: i64, from_user_id: i64, is_typing: bool) {
        self.dispatcher
            .broadcast(
                exchange_id,
                ChatEvent::Typing { exchange_id, from_user_id, is_typing },
            )
            .await;
    }

    fn decorate(
        &self,
        rows: Vec<MessageRow>,
        attachment_rows: Vec<AttachmentRow>,
        reaction_rows: Vec<ReactionRow>,
    ) -> Vec<ChatMessage> {
        let mut attachments_by_message: HashMap<i64, Vec<AttachmentView>> = HashMap::new();
        for a in attachment_rows {
            attachments_by_message
                .entry(a.message_id)
                .or_default()
                .push(AttachmentView {
                    id: a.id,
                    url: a.url,
                    mime_type: a.mime_type,
                    original_name: self.cipher.decrypt(&a.original_name),
                    size_bytes: a.size_bytes,
                });
        }

        let mut reactions_by_message: HashMap<i64, Vec<ReactionView>> = HashMap::new();
        for r in reaction_rows {
            reactions_by_message
                .entry(r.message_id)
                .or_default()
                .push(ReactionView { emoji: r.emoji, user_id: r.user_id });
        }

        rows.into_iter()
            .map(|row| ChatMessage {
                id: row.id,
                exchange_id: row.exchange_id,
                from_user_id: row.from_user_id,
                from_name: row.from_name,
                to_user_id: row.to_user_id,
                body: self.cipher.decrypt(&row.body),
                delivered_at: row.delivered_at,
                read_at: row.read_at,
                created_at: row.created_at,
                attachments: attachments_by_message.remove(&row.id).unwrap_or_default(),
                reactions: reactions_by_message.remove(&row.id).unwrap_or_default(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatContext").finish_non_exhaustive()
    }
}

/// Log-and-drop wrapper for realtime command failures. The socket path is
/// best-effort; the caller re-syncs through REST.
pub(crate) fn log_chat_error(what: &str, err: &ApiError) {
    error!("chat {what} failed: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillswap_crypto::keys::generate_key;

    struct Fixture {
        chat: ChatContext,
        exchange_id: i64,
        alice: i64,
        bob: i64,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "").unwrap();
        let exchange_id = db
            .create_exchange(alice, bob, "", &[guitar], &[sketching], &now_rfc3339())
            .unwrap();
        db.accept_exchange(exchange_id, guitar, sketching).unwrap();

        let chat = ChatContext::new(
            db,
            TextCipher::new(generate_key()),
            Dispatcher::new(),
        );
        Fixture { chat, exchange_id, alice, bob }
    }

    #[tokio::test]
    async fn send_persists_ciphertext_and_lists_plaintext() {
        let f = fixture();

        let sent = f.chat.send(f.exchange_id, f.alice, "  hi there  ", None).await.unwrap();
        assert_eq!(sent.body, "hi there");
        assert_eq!(sent.to_user_id, f.bob);
        assert_eq!(sent.from_name, "Alice");

        // At rest the body is opaque.
        let raw = f.chat.db.get_message(sent.id).unwrap().unwrap();
        assert!(raw.body.starts_with("enc:v1:"));

        let (page, total) = f.chat.list(f.exchange_id, f.bob, 30, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].body, "hi there");
        assert_eq!(page[0].read_at, None);
    }

    #[tokio::test]
    async fn gating_follows_exchange_status() {
        let f = fixture();
        let db = &f.chat.db;

        // Outsider is rejected outright.
        let carol = db.insert_user("Carol").unwrap();
        let err = f.chat.send(f.exchange_id, carol, "hi", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Completed thread is read-only.
        db.confirm_completion(f.exchange_id, skillswap_db::models::ParticipantSide::Requester, &now_rfc3339()).unwrap();
        db.confirm_completion(f.exchange_id, skillswap_db::models::ParticipantSide::Owner, &now_rfc3339()).unwrap();
        db.promote_completed(f.exchange_id, &now_rfc3339()).unwrap();

        let err = f.chat.send(f.exchange_id, f.alice, "late", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
        let (_, total) = f.chat.list(f.exchange_id, f.alice, 30, 0).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn pending_exchange_has_no_chat() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "").unwrap();
        let exchange_id = db
            .create_exchange(alice, bob, "", &[guitar], &[sketching], &now_rfc3339())
            .unwrap();
        let chat = ChatContext::new(db, TextCipher::disabled(), Dispatcher::new());

        let err = chat.list(exchange_id, alice, 30, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
        let err = chat.send(exchange_id, alice, "hi", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }

    #[tokio::test]
    async fn empty_body_requires_attachment() {
        let f = fixture();

        let err = f.chat.send(f.exchange_id, f.alice, "   ", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let attachment = NewAttachment {
            url: "/uploads/chat_abc.png".into(),
            mime_type: "image/png".into(),
            original_name: "sketch.png".into(),
            size_bytes: 123,
        };
        let sent = f.chat.send(f.exchange_id, f.alice, "", Some(attachment)).await.unwrap();
        assert_eq!(sent.body, "");
        assert_eq!(sent.attachments.len(), 1);
        assert_eq!(sent.attachments[0].original_name, "sketch.png");

        // Filename is encrypted at rest but decrypted on listing.
        let (page, _) = f.chat.list(f.exchange_id, f.bob, 30, 0).await.unwrap();
        assert_eq!(page[0].attachments[0].original_name, "sketch.png");
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let f = fixture();
        let body = "x".repeat(MAX_BODY_CHARS + 1);
        let err = f.chat.send(f.exchange_id, f.alice, &body, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn send_and_mark_read_fan_out() {
        let f = fixture();
        let mut rx = f.chat.dispatcher.subscribe(f.exchange_id).await;

        f.chat.send(f.exchange_id, f.alice, "ping", None).await.unwrap();
        match rx.recv().await.unwrap() {
            ChatEvent::NewMessage { message, .. } => assert_eq!(message.body, "ping"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(f.chat.mark_read(f.exchange_id, f.bob).await.unwrap(), 1);
        match rx.recv().await.unwrap() {
            ChatEvent::Read { user_id, .. } => assert_eq!(user_id, f.bob),
            other => panic!("unexpected event: {other:?}"),
        }

        // Nothing left unread: no second receipt is broadcast.
        assert_eq!(f.chat.mark_read(f.exchange_id, f.bob).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }
}
