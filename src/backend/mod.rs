pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{AuthEvent, MessageEvent, MessageFilter, ProfileEvent, Subscription};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::Message;
use crate::profile::profile_models::{Presence, Profile};

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Established session as reported by the auth provider. The access token is
/// opaque to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub access_token: String,
}

/// The backend-as-a-service boundary: authenticated CRUD over profiles and
/// messages, filtered change feeds, binary object upload, and the session
/// lifecycle stream. Everything behind it (credential verification,
/// authorization policy, fan-out transport, query execution) is an opaque
/// collaborator.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    // ── Session lifecycle ────────────────────────────────────────────────

    async fn sign_up(&self, display_name: &str, email: &str, password: &str)
        -> Result<AuthSession>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;
    async fn sign_out(&self) -> Result<()>;
    fn auth_events(&self) -> Subscription<AuthEvent>;

    // ── Profiles ─────────────────────────────────────────────────────────

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>>;
    async fn list_profiles(&self) -> Result<Vec<Profile>>;
    /// Also bumps `last_active` to now.
    async fn set_presence(&self, user_id: Uuid, presence: Presence) -> Result<()>;
    fn subscribe_profiles(&self) -> Subscription<ProfileEvent>;

    // ── Messages ─────────────────────────────────────────────────────────

    /// Server assigns identifier and timestamps.
    async fn create_message(&self, request: SendMessageRequest) -> Result<Message>;
    /// Both directions of the pair, ordered by creation time ascending.
    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;
    /// Every message where the user is sender or receiver.
    async fn fetch_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>>;
    async fn mark_read(&self, message_id: Uuid) -> Result<Message>;
    /// Flips every unread message sent by `other` to `me`; returns how many.
    async fn mark_conversation_read(&self, me: Uuid, other: Uuid) -> Result<u64>;
    fn subscribe_messages(&self, filter: MessageFilter) -> Subscription<MessageEvent>;

    // ── Object storage ───────────────────────────────────────────────────

    /// Uploads under a namespaced path and returns a publicly resolvable
    /// reference.
    async fn upload_image(&self, path: &str, content_type: &str, bytes: Vec<u8>)
        -> Result<String>;
}
