use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::events::{
    AuthEvent, MessageEvent, MessageFilter, ProfileEvent, ReleaseGuard, Subscription,
};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::Message;
use crate::profile::profile_models::{Presence, Profile};
use crate::state::Config;

use super::{AuthSession, ChatBackend};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: Uuid,
}

#[derive(Clone)]
struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    user_id: Uuid,
}

/// Client for a hosted backend-as-a-service exposing bearer-token auth,
/// PostgREST-style filtered record queries, and namespaced object storage.
///
/// Change feeds are interval polls against an `updated_at` watermark: rows
/// created after the watermark become inserts, rows merely touched after it
/// become updates. No bespoke wire protocol is involved.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
    poll_interval: Duration,
    token: Arc<Mutex<Option<TokenState>>>,
    auth_subs: Arc<DashMap<Uuid, mpsc::UnboundedSender<AuthEvent>>>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            api_key: config.backend_api_key.clone(),
            bucket: config.storage_bucket.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            token: Arc::new(Mutex::new(None)),
            auth_subs: Arc::new(DashMap::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("apikey", &self.api_key);
        let token = self.token.lock().unwrap().clone();
        match token {
            Some(state) => builder.bearer_auth(state.access_token),
            None => builder.bearer_auth(&self.api_key),
        }
    }

    fn publish_auth(&self, event: AuthEvent) {
        self.auth_subs.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn store_session(&self, response: TokenResponse) -> AuthSession {
        let session = AuthSession {
            user_id: response.user.id,
            access_token: response.access_token.clone(),
        };
        *self.token.lock().unwrap() = Some(TokenState {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user_id: response.user.id,
        });
        self.publish_auth(AuthEvent::SignedIn {
            user_id: session.user_id,
        });
        session
    }

    /// Exchanges the stored refresh token for a new access token and
    /// notifies the auth stream.
    pub async fn refresh_session(&self) -> Result<()> {
        let (refresh_token, user_id) = {
            let token = self.token.lock().unwrap();
            let state = token
                .as_ref()
                .ok_or_else(|| AppError::Unauthorized("No active session".to_string()))?;
            let refresh = state.refresh_token.clone().ok_or_else(|| {
                AppError::Unauthorized("No refresh token for this session".to_string())
            })?;
            (refresh, state.user_id)
        };

        let response = self
            .authed(self.client.post(format!("{}/auth/v1/token", self.base_url)))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let response = check(response).await?;
        let parsed: TokenResponse = response.json().await?;

        *self.token.lock().unwrap() = Some(TokenState {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            user_id: parsed.user.id,
        });
        self.publish_auth(AuthEvent::TokenRefreshed { user_id });
        Ok(())
    }

    fn filter_params(filter: &MessageFilter) -> Vec<(String, String)> {
        match filter {
            MessageFilter::Pair(key) => {
                let (a, b) = key.participants();
                vec![(
                    "or".to_string(),
                    format!(
                        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
                    ),
                )]
            }
            MessageFilter::Involving(user_id) => vec![(
                "or".to_string(),
                format!("(sender_id.eq.{user_id},receiver_id.eq.{user_id})"),
            )],
        }
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::Unauthorized(format!("{}: {}", status, detail))
        }
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            AppError::UsernameTaken(detail)
        }
        StatusCode::NOT_FOUND => AppError::NotFound(detail),
        _ => AppError::Backend(format!("{}: {}", status, detail)),
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn sign_up(
        &self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        crate::profile::profile_models::validate_display_name(display_name)?;

        let response = self
            .authed(self.client.post(format!("{}/auth/v1/signup", self.base_url)))
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name },
            }))
            .send()
            .await?;
        let response = check(response).await?;
        let parsed: TokenResponse = response.json().await?;
        let session = self.store_session(parsed);

        // First authentication creates the identity record.
        let profile = Profile::new(session.user_id, display_name)?;
        let response = self
            .authed(self.client.post(self.rest_url("profiles")))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&profile)
            .send()
            .await?;
        check(response).await?;

        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let response = self
            .authed(self.client.post(format!("{}/auth/v1/token", self.base_url)))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
        let response = check(response).await?;
        let parsed: TokenResponse = response.json().await?;
        Ok(self.store_session(parsed))
    }

    async fn sign_out(&self) -> Result<()> {
        let state = self.token.lock().unwrap().take();
        let Some(state) = state else {
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&state.access_token)
            .send()
            .await?;
        check(response).await?;

        self.publish_auth(AuthEvent::SignedOut {
            user_id: state.user_id,
        });
        Ok(())
    }

    fn auth_events(&self) -> Subscription<AuthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.auth_subs.insert(id, tx);
        let subs = self.auth_subs.clone();
        Subscription::new(
            rx,
            ReleaseGuard::new(move || {
                subs.remove(&id);
            }),
        )
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let response = self
            .authed(self.client.get(self.rest_url("profiles")))
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .send()
            .await?;
        let response = check(response).await?;
        let mut rows: Vec<Profile> = response.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let response = self
            .authed(self.client.get(self.rest_url("profiles")))
            .query(&[("select", "*"), ("order", "display_name.asc")])
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn set_presence(&self, user_id: Uuid, presence: Presence) -> Result<()> {
        let response = self
            .authed(self.client.patch(self.rest_url("profiles")))
            .query(&[("id", format!("eq.{user_id}"))])
            .json(&json!({
                "presence": presence,
                "last_active": Utc::now(),
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn subscribe_profiles(&self) -> Subscription<ProfileEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = self.clone();
        let handle = tokio::spawn(async move {
            let mut watermark = Utc::now();
            let mut ticker = tokio::time::interval(backend.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let rows = backend.poll_profiles(watermark).await;
                let Ok(rows) = rows else { continue };
                for profile in rows {
                    if profile.last_active > watermark {
                        watermark = profile.last_active;
                    }
                    if tx.send(ProfileEvent::Upserted(profile)).is_err() {
                        return;
                    }
                }
            }
        });
        Subscription::new(rx, ReleaseGuard::new(move || handle.abort()))
    }

    async fn create_message(&self, request: SendMessageRequest) -> Result<Message> {
        request.validate()?;
        let response = self
            .authed(self.client.post(self.rest_url("messages")))
            .header("Prefer", "return=representation")
            .json(&json!({
                "sender_id": request.sender_id,
                "receiver_id": request.receiver_id,
                "body": request.body,
                "image_url": request.image_url,
            }))
            .send()
            .await?;
        let response = check(response).await?;
        let mut rows: Vec<Message> = response.json().await?;
        if rows.is_empty() {
            return Err(AppError::Backend(
                "Create returned no representation".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let key = crate::message::message_models::ConversationKey::new(a, b);
        let mut params = Self::filter_params(&MessageFilter::Pair(key));
        params.push(("order".to_string(), "created_at.asc".to_string()));
        let response = self
            .authed(self.client.get(self.rest_url("messages")))
            .query(&params)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn fetch_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let mut params = Self::filter_params(&MessageFilter::Involving(user_id));
        params.push(("order".to_string(), "created_at.asc".to_string()));
        let response = self
            .authed(self.client.get(self.rest_url("messages")))
            .query(&params)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn mark_read(&self, message_id: Uuid) -> Result<Message> {
        let response = self
            .authed(self.client.patch(self.rest_url("messages")))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{message_id}"))])
            .json(&json!({ "is_read": true, "updated_at": Utc::now() }))
            .send()
            .await?;
        let response = check(response).await?;
        let mut rows: Vec<Message> = response.json().await?;
        if rows.is_empty() {
            return Err(AppError::NotFound("Message not found".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn mark_conversation_read(&self, me: Uuid, other: Uuid) -> Result<u64> {
        let response = self
            .authed(self.client.patch(self.rest_url("messages")))
            .header("Prefer", "return=representation")
            .query(&[
                ("receiver_id", format!("eq.{me}")),
                ("sender_id", format!("eq.{other}")),
                ("is_read", "eq.false".to_string()),
            ])
            .json(&json!({ "is_read": true, "updated_at": Utc::now() }))
            .send()
            .await?;
        let response = check(response).await?;
        let rows: Vec<Message> = response.json().await?;
        Ok(rows.len() as u64)
    }

    fn subscribe_messages(&self, filter: MessageFilter) -> Subscription<MessageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = self.clone();
        let handle = tokio::spawn(async move {
            let mut watermark = Utc::now();
            let mut ticker = tokio::time::interval(backend.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let rows = backend.poll_messages(&filter, watermark).await;
                let Ok(rows) = rows else { continue };
                for message in rows {
                    let event = if message.created_at > watermark {
                        MessageEvent::Inserted(message.clone())
                    } else {
                        MessageEvent::Updated(message.clone())
                    };
                    if message.updated_at > watermark {
                        watermark = message.updated_at;
                    }
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });
        Subscription::new(rx, ReleaseGuard::new(move || handle.abort()))
    }

    async fn upload_image(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .authed(self.client.post(&url))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::UploadFailed(format!("{}: {}", status, detail)));
        }
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        ))
    }
}

impl HttpBackend {
    async fn poll_messages(
        &self,
        filter: &MessageFilter,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let mut params = Self::filter_params(filter);
        params.push((
            "updated_at".to_string(),
            format!("gt.{}", watermark.to_rfc3339()),
        ));
        params.push(("order".to_string(), "updated_at.asc".to_string()));
        let response = self
            .authed(self.client.get(self.rest_url("messages")))
            .query(&params)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn poll_profiles(&self, watermark: DateTime<Utc>) -> Result<Vec<Profile>> {
        let response = self
            .authed(self.client.get(self.rest_url("profiles")))
            .query(&[
                ("last_active", format!("gt.{}", watermark.to_rfc3339())),
                ("order", "last_active.asc".to_string()),
            ])
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}
