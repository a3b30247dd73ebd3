use serde::{Deserialize, Serialize};

/// Lifecycle of an exchange. `pending` is the only state that can still be
/// responded to; `accepted` is the only non-terminal successor and the only
/// state in which chat writes are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl ExchangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Chat history is readable once the exchange has been accepted, and
    /// stays readable after completion.
    pub fn chat_readable(self) -> bool {
        matches!(self, Self::Accepted | Self::Completed)
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status an exchange is treated as having for read purposes: an accepted
/// exchange with both completion confirmations in place reads as completed
/// even before the stored status is promoted. Every boundary that serializes
/// an exchange outward goes through this one derivation.
pub fn effective_status(
    status: ExchangeStatus,
    completed_by_requester_at: Option<&str>,
    completed_by_owner_at: Option<&str>,
) -> ExchangeStatus {
    if status == ExchangeStatus::Accepted
        && completed_by_requester_at.is_some()
        && completed_by_owner_at.is_some()
    {
        ExchangeStatus::Completed
    } else {
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            ExchangeStatus::Pending,
            ExchangeStatus::Accepted,
            ExchangeStatus::Rejected,
            ExchangeStatus::Cancelled,
            ExchangeStatus::Completed,
        ] {
            assert_eq!(ExchangeStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ExchangeStatus::parse("bogus"), None);
    }

    #[test]
    fn effective_status_requires_both_confirmations() {
        let ts = Some("2026-01-01T00:00:00Z");
        assert_eq!(
            effective_status(ExchangeStatus::Accepted, ts, None),
            ExchangeStatus::Accepted
        );
        assert_eq!(
            effective_status(ExchangeStatus::Accepted, None, ts),
            ExchangeStatus::Accepted
        );
        assert_eq!(
            effective_status(ExchangeStatus::Accepted, ts, ts),
            ExchangeStatus::Completed
        );
        // Only accepted exchanges are promoted at read time.
        assert_eq!(
            effective_status(ExchangeStatus::Pending, ts, ts),
            ExchangeStatus::Pending
        );
    }
}
