use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A single directed communication unit between two profiles.
///
/// Immutable after creation except for the read flag; `updated_at` tracks
/// that flip so change feeds can distinguish inserts from updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// At least one of body or image reference must be present.
    pub fn has_content(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty()) || self.image_url.is_some()
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other side of the conversation from `user_id`'s point of view.
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if self.sender_id == user_id {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// Normalized unordered pair of participants. The conversation identity is
/// derived from messages, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    lo: Uuid,
    hi: Uuid,
}

impl ConversationKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.lo == user_id || self.hi == user_id
    }

    pub fn matches(&self, message: &Message) -> bool {
        *self == ConversationKey::new(message.sender_id, message.receiver_id)
    }

    pub fn participants(&self) -> (Uuid, Uuid) {
        (self.lo, self.hi)
    }
}

/// A not-yet-sent message in the optimistic path. Construction enforces the
/// content-or-image invariant so invalid drafts never reach the backend.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: Option<String>,
    pub image_url: Option<String>,
}

impl MessageDraft {
    pub fn text(sender_id: Uuid, receiver_id: Uuid, body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(AppError::Validation(
                "Message must carry text or an image".to_string(),
            ));
        }
        Ok(Self {
            sender_id,
            receiver_id,
            body: Some(body.to_string()),
            image_url: None,
        })
    }

    pub fn image(sender_id: Uuid, receiver_id: Uuid, image_url: &str) -> Result<Self> {
        if image_url.is_empty() {
            return Err(AppError::Validation(
                "Message must carry text or an image".to_string(),
            ));
        }
        Ok(Self {
            sender_id,
            receiver_id,
            body: None,
            image_url: Some(image_url.to_string()),
        })
    }

    /// Local-clock placeholder rendered while the create round-trip is in
    /// flight. The server-confirmed record replaces it wholesale.
    pub fn into_pending(self, temp_id: Uuid) -> Message {
        let now = Utc::now();
        Message {
            id: temp_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            image_url: self.image_url,
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_requires_text_or_image() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(MessageDraft::text(a, b, "").is_err());
        assert!(MessageDraft::text(a, b, "   ").is_err());
        assert!(MessageDraft::image(a, b, "").is_err());

        let text = MessageDraft::text(a, b, "hi").unwrap();
        assert_eq!(text.body.as_deref(), Some("hi"));
        assert!(text.image_url.is_none());

        let image = MessageDraft::image(a, b, "objects/cat.jpg").unwrap();
        assert!(image.body.is_none());
        assert_eq!(image.image_url.as_deref(), Some("objects/cat.jpg"));
    }

    #[test]
    fn pending_message_satisfies_content_invariant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let pending = MessageDraft::text(a, b, "hi")
            .unwrap()
            .into_pending(Uuid::new_v4());
        assert!(pending.has_content());
        assert!(!pending.is_read);
    }

    #[test]
    fn conversation_key_is_order_insensitive() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ConversationKey::new(a, b), ConversationKey::new(b, a));
        assert!(ConversationKey::new(a, b).contains(a));
        assert!(!ConversationKey::new(a, b).contains(Uuid::new_v4()));
    }

    #[test]
    fn counterpart_resolves_both_directions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let msg = MessageDraft::text(a, b, "hi")
            .unwrap()
            .into_pending(Uuid::new_v4());
        assert_eq!(msg.counterpart(a), b);
        assert_eq!(msg.counterpart(b), a);
    }
}
