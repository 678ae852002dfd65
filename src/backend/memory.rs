use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::events::{
    AuthEvent, MessageEvent, MessageFilter, ProfileEvent, ReleaseGuard, Subscription,
};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::{ConversationKey, Message};
use crate::profile::profile_models::{validate_display_name, Presence, Profile};

use super::{AuthSession, ChatBackend};

struct AuthRecord {
    user_id: Uuid,
    password: String,
}

/// In-process backend used by the demo binary and the tests. Implements the
/// full boundary contract, including filter-scoped change feeds, so the
/// client services run unchanged against it.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    accounts: DashMap<String, AuthRecord>,
    profiles: DashMap<Uuid, Profile>,
    messages: DashMap<Uuid, Message>,
    objects: DashMap<String, Vec<u8>>,
    current: Mutex<Option<Uuid>>,
    fail_creates: AtomicBool,
    auth_subs: DashMap<Uuid, mpsc::UnboundedSender<AuthEvent>>,
    profile_subs: DashMap<Uuid, mpsc::UnboundedSender<ProfileEvent>>,
    message_subs: DashMap<Uuid, (MessageFilter, mpsc::UnboundedSender<MessageEvent>)>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts: DashMap::new(),
                profiles: DashMap::new(),
                messages: DashMap::new(),
                objects: DashMap::new(),
                current: Mutex::new(None),
                fail_creates: AtomicBool::new(false),
                auth_subs: DashMap::new(),
                profile_subs: DashMap::new(),
                message_subs: DashMap::new(),
            }),
        }
    }

    /// Fault injection for failure-path tests: while set, `create_message`
    /// fails without storing anything.
    pub fn set_fail_creates(&self, fail: bool) {
        self.inner.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Rotates the access token for the active session and notifies the
    /// auth stream, the way a hosted provider refreshes in the background.
    pub fn refresh_token(&self) {
        let current = *self.inner.current.lock().unwrap();
        if let Some(user_id) = current {
            self.publish_auth(AuthEvent::TokenRefreshed { user_id });
        }
    }

    pub fn stored_object(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.objects.get(path).map(|b| b.clone())
    }

    fn publish_auth(&self, event: AuthEvent) {
        self.inner
            .auth_subs
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn publish_profile(&self, profile: &Profile) {
        let event = ProfileEvent::Upserted(profile.clone());
        self.inner
            .profile_subs
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn publish_message(&self, event: MessageEvent) {
        self.inner.message_subs.retain(|_, (filter, tx)| {
            if filter.matches(event.message()) {
                tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn sign_up(
        &self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        validate_display_name(display_name)?;

        if self.inner.accounts.contains_key(email) {
            return Err(AppError::UsernameTaken(email.to_string()));
        }
        let name_taken = self
            .inner
            .profiles
            .iter()
            .any(|p| p.display_name.eq_ignore_ascii_case(display_name));
        if name_taken {
            return Err(AppError::UsernameTaken(display_name.to_string()));
        }

        let user_id = Uuid::new_v4();
        self.inner.accounts.insert(
            email.to_string(),
            AuthRecord {
                user_id,
                password: password.to_string(),
            },
        );

        let profile = Profile::new(user_id, display_name)?;
        self.inner.profiles.insert(user_id, profile.clone());
        self.publish_profile(&profile);

        *self.inner.current.lock().unwrap() = Some(user_id);
        self.publish_auth(AuthEvent::SignedIn { user_id });

        Ok(AuthSession {
            user_id,
            access_token: Uuid::new_v4().to_string(),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let account = self
            .inner
            .accounts
            .get(email)
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;
        if account.password != password {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
        let user_id = account.user_id;
        drop(account);

        *self.inner.current.lock().unwrap() = Some(user_id);
        self.publish_auth(AuthEvent::SignedIn { user_id });

        Ok(AuthSession {
            user_id,
            access_token: Uuid::new_v4().to_string(),
        })
    }

    async fn sign_out(&self) -> Result<()> {
        let current = self.inner.current.lock().unwrap().take();
        if let Some(user_id) = current {
            self.publish_auth(AuthEvent::SignedOut { user_id });
        }
        Ok(())
    }

    fn auth_events(&self) -> Subscription<AuthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.auth_subs.insert(id, tx);
        let inner = self.inner.clone();
        Subscription::new(
            rx,
            ReleaseGuard::new(move || {
                inner.auth_subs.remove(&id);
            }),
        )
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        Ok(self.inner.profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.inner.profiles.iter().map(|p| p.clone()).collect())
    }

    async fn set_presence(&self, user_id: Uuid, presence: Presence) -> Result<()> {
        let mut profile = self
            .inner
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?;
        profile.presence = presence;
        profile.last_active = Utc::now();
        let snapshot = profile.clone();
        drop(profile);

        self.publish_profile(&snapshot);
        Ok(())
    }

    fn subscribe_profiles(&self) -> Subscription<ProfileEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.profile_subs.insert(id, tx);
        let inner = self.inner.clone();
        Subscription::new(
            rx,
            ReleaseGuard::new(move || {
                inner.profile_subs.remove(&id);
            }),
        )
    }

    async fn create_message(&self, request: SendMessageRequest) -> Result<Message> {
        if self.inner.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::Backend("simulated create failure".to_string()));
        }
        request.validate()?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            body: request.body,
            image_url: request.image_url,
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        self.inner.messages.insert(message.id, message.clone());
        self.publish_message(MessageEvent::Inserted(message.clone()));

        Ok(message)
    }

    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let key = ConversationKey::new(a, b);
        let mut messages: Vec<Message> = self
            .inner
            .messages
            .iter()
            .filter(|m| key.matches(m))
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    async fn fetch_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .inner
            .messages
            .iter()
            .filter(|m| m.involves(user_id))
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    async fn mark_read(&self, message_id: Uuid) -> Result<Message> {
        let mut message = self
            .inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        if !message.is_read {
            message.is_read = true;
            message.updated_at = Utc::now();
        }
        let snapshot = message.clone();
        drop(message);

        self.publish_message(MessageEvent::Updated(snapshot.clone()));
        Ok(snapshot)
    }

    async fn mark_conversation_read(&self, me: Uuid, other: Uuid) -> Result<u64> {
        let unread: Vec<Uuid> = self
            .inner
            .messages
            .iter()
            .filter(|m| m.sender_id == other && m.receiver_id == me && !m.is_read)
            .map(|m| m.id)
            .collect();

        let mut flipped = 0u64;
        for id in unread {
            if self.mark_read(id).await.is_ok() {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    fn subscribe_messages(&self, filter: MessageFilter) -> Subscription<MessageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.message_subs.insert(id, (filter, tx));
        let inner = self.inner.clone();
        Subscription::new(
            rx,
            ReleaseGuard::new(move || {
                inner.message_subs.remove(&id);
            }),
        )
    }

    async fn upload_image(
        &self,
        path: &str,
        _content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        self.inner.objects.insert(path.to_string(), bytes);
        Ok(format!("memory://storage/{}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_rejects_duplicate_names() {
        let backend = MemoryBackend::new();
        backend.sign_up("alice", "a@example.com", "pw").await.unwrap();

        let err = backend.sign_up("alice", "b@example.com", "pw").await;
        assert!(matches!(err, Err(AppError::UsernameTaken(_))));

        let err = backend.sign_up("other", "a@example.com", "pw").await;
        assert!(matches!(err, Err(AppError::UsernameTaken(_))));
    }

    #[tokio::test]
    async fn pair_subscription_only_sees_its_conversation() {
        let backend = MemoryBackend::new();
        let a = backend.sign_up("alice", "a@x.com", "pw").await.unwrap().user_id;
        let b = backend.sign_up("bobby", "b@x.com", "pw").await.unwrap().user_id;
        let c = backend.sign_up("carol", "c@x.com", "pw").await.unwrap().user_id;

        let mut sub =
            backend.subscribe_messages(MessageFilter::Pair(ConversationKey::new(a, b)));

        let req = SendMessageRequest {
            sender_id: a,
            receiver_id: c,
            body: Some("off-pair".to_string()),
            image_url: None,
        };
        backend.create_message(req).await.unwrap();

        let req = SendMessageRequest {
            sender_id: b,
            receiver_id: a,
            body: Some("on-pair".to_string()),
            image_url: None,
        };
        let sent = backend.create_message(req).await.unwrap();

        match sub.try_recv() {
            Some(MessageEvent::Inserted(m)) => assert_eq!(m.id, sent.id),
            other => panic!("expected on-pair insert, got {:?}", other.map(|e| e.message().id)),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn mark_conversation_read_flips_only_inbound_unread() {
        let backend = MemoryBackend::new();
        let a = backend.sign_up("alice", "a@x.com", "pw").await.unwrap().user_id;
        let b = backend.sign_up("bobby", "b@x.com", "pw").await.unwrap().user_id;

        for text in ["one", "two", "three"] {
            let req = SendMessageRequest {
                sender_id: a,
                receiver_id: b,
                body: Some(text.to_string()),
                image_url: None,
            };
            backend.create_message(req).await.unwrap();
        }
        let req = SendMessageRequest {
            sender_id: b,
            receiver_id: a,
            body: Some("reply".to_string()),
            image_url: None,
        };
        backend.create_message(req).await.unwrap();

        assert_eq!(backend.mark_conversation_read(b, a).await.unwrap(), 3);
        assert_eq!(backend.mark_conversation_read(b, a).await.unwrap(), 0);

        let reply_still_unread = backend
            .fetch_conversation(a, b)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.receiver_id == a && !m.is_read)
            .count();
        assert_eq!(reply_still_unread, 1);
    }
}
