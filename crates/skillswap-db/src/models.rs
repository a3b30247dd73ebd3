use skillswap_types::models::{ExchangeStatus, effective_status};

/// Database row types — these map directly to SQLite rows.
/// Distinct from the skillswap-types API views so the DB layer stays
/// independent of serialization concerns.

pub struct UserRow {
    pub id: i64,
    pub name: String,
}

pub struct SkillRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
}

/// Which side of an exchange a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantSide {
    Requester,
    Owner,
}

pub struct ExchangeRow {
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
}

impl ExchangeRow {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }

    /// The side `user_id` is on. Callers check participation first.
    pub fn side_of(&self, user_id: i64) -> Option<ParticipantSide> {
        if user_id == self.requester_id {
            Some(ParticipantSide::Requester)
        } else if user_id == self.owner_id {
            Some(ParticipantSide::Owner)
        } else {
            None
        }
    }

    /// The other participant. Callers check participation first.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if user_id == self.owner_id {
            self.requester_id
        } else {
            self.owner_id
        }
    }

    pub fn effective_status(&self) -> ExchangeStatus {
        effective_status(
            self.status,
            self.completed_by_requester_at.as_deref(),
            self.completed_by_owner_at.as_deref(),
        )
    }
}

pub struct MessageRow {
    pub id: i64,
    pub exchange_id: i64,
    pub from_user_id: i64,
    pub from_name: String,
    pub to_user_id: i64,
    pub body: String,
    pub delivered_at: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub url: String,
    pub mime_type: String,
    pub original_name: String,
    pub size_bytes: i64,
}

pub struct ReactionRow {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub created_at: String,
}

pub struct FeedbackRow {
    pub id: i64,
    pub exchange_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
}
