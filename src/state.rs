use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::message::ConversationListService;
use crate::profile::RosterService;
use crate::session::SessionService;

#[derive(Clone)]
pub struct Config {
    pub backend_url: String,
    pub backend_api_key: String,
    pub storage_bucket: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            backend_url: std::env::var("CHAT_BACKEND_URL").expect("CHAT_BACKEND_URL must be set"),
            backend_api_key: std::env::var("CHAT_BACKEND_API_KEY")
                .expect("CHAT_BACKEND_API_KEY must be set"),
            storage_bucket: std::env::var("CHAT_STORAGE_BUCKET")
                .unwrap_or_else(|_| "chat-images".to_string()),
        }
    }
}

/// Service bundle wired over one backend. Conversations are opened on demand
/// through [`crate::message::ConversationService::open`].
pub struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub session: SessionService,
    pub roster: RosterService,
    pub conversation_list: ConversationListService,
}

impl AppState {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            session: SessionService::new(backend.clone()),
            roster: RosterService::new(backend.clone()),
            conversation_list: ConversationListService::new(backend.clone()),
            backend,
        }
    }
}
