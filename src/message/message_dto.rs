use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::message::message_models::MessageDraft;

/// Wire payload for creating a message at the backend boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: Option<String>,
    pub image_url: Option<String>,
}

// Either-or rule across two fields, so a manual impl instead of the
// field-level derive used elsewhere.
impl Validate for SendMessageRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let has_body = self.body.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_body && self.image_url.is_none() {
            let mut errors = ValidationErrors::new();
            errors.add("body", ValidationError::new("empty_message"));
            return Err(errors);
        }
        Ok(())
    }
}

impl From<MessageDraft> for SendMessageRequest {
    fn from(draft: MessageDraft) -> Self {
        Self {
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            body: draft.body,
            image_url: draft.image_url,
        }
    }
}

/// One row of the conversation list: the counterpart plus the newest message
/// and how many inbound messages are still unread.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub counterpart_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub last_message: Option<LastMessage>,
    pub unread_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastMessage {
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub from_me: bool,
}
