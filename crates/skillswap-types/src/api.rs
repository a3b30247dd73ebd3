use serde::{Deserialize, Serialize};

use crate::models::ExchangeStatus;

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the WebSocket gateway's
/// Identify handshake. Canonical definition lives here to keep the two auth
/// paths identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub name: String,
    pub exp: usize,
}

// -- Exchanges --

/// Body of `POST /exchanges`. The singular `skillOffered`/`skillRequested`
/// fields are legacy sugar for one-element arrays.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeRequest {
    pub receiver: Option<i64>,
    #[serde(default)]
    pub offered_skills: Option<Vec<i64>>,
    #[serde(default)]
    pub interested_skills: Option<Vec<i64>>,
    pub skill_offered: Option<i64>,
    pub skill_requested: Option<i64>,
    pub message: Option<String>,
}

/// Body of `PATCH /exchanges/{id}/respond`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub status: String,
    pub skill_offered: Option<i64>,
    pub skill_requested: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillRef {
    pub id: i64,
    pub title: String,
}

/// An exchange as serialized outward. `status` is always the effective
/// status; the raw stored status never leaves the service.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeView {
    pub id: i64,
    pub requester_id: i64,
    pub owner_id: i64,
    pub skill_offered_id: Option<i64>,
    pub skill_requested_id: Option<i64>,
    pub status: ExchangeStatus,
    pub message: String,
    pub completed_by_requester_at: Option<String>,
    pub completed_by_owner_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub requester_name: String,
    pub owner_name: String,
    pub requested_title: Option<String>,
    pub offered_title: Option<String>,
    pub offered_skills: Vec<SkillRef>,
    pub interested_skills: Vec<SkillRef>,
}

/// Entry of the role-filtered learning/teaching listings: the exchange plus
/// the counterpart's feedback about the caller, if any.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeSummary {
    #[serde(flatten)]
    pub exchange: ExchangeView,
    pub requested_description: Option<String>,
    pub offered_description: Option<String>,
    pub feedback_rating: Option<i64>,
    pub feedback_comment: Option<String>,
    pub feedback_at: Option<String>,
}

// -- Chat --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentView {
    pub id: i64,
    pub url: String,
    pub mime_type: String,
    pub original_name: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionView {
    pub emoji: String,
    pub user_id: i64,
}

/// A chat message decorated for display: decrypted body, sender name,
/// attachments with decrypted filenames, reactions in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub exchange_id: i64,
    pub from_user_id: i64,
    pub from_name: String,
    pub to_user_id: i64,
    pub body: String,
    pub delivered_at: String,
    pub read_at: Option<String>,
    pub created_at: String,
    pub attachments: Vec<AttachmentView>,
    pub reactions: Vec<ReactionView>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: i64,
}

/// One row of `GET /exchanges/chats`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: i64,
    pub status: ExchangeStatus,
    pub requester_id: i64,
    pub owner_id: i64,
    pub requester_name: String,
    pub owner_name: String,
    pub requested_title: Option<String>,
    pub offered_title: Option<String>,
    pub other_user_id: i64,
    pub other_user_name: String,
    pub last_body: Option<String>,
    pub last_at: Option<String>,
    pub unread_count: i64,
    pub created_at: String,
}

// -- Feedback & ratings --

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackView {
    pub id: i64,
    pub exchange_id: i64,
    pub from_user_id: i64,
    pub from_name: String,
    pub to_user_id: i64,
    pub to_name: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingStats {
    pub average_rating: f64,
    pub ratings_count: i64,
}

impl Default for RatingStats {
    fn default() -> Self {
        Self { average_rating: 0.0, ratings_count: 0 }
    }
}
