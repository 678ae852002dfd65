use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::{AuthSession, ChatBackend};
use crate::error::Result;
use crate::events::{AuthEvent, Subscription};
use crate::profile::profile_models::{Presence, Profile};

/// Explicit session context: consumes the backend's auth event stream and
/// exposes the active profile through a watch channel, so dependents observe
/// sign-in and sign-out transitions instead of reading global state.
pub struct SessionService {
    backend: Arc<dyn ChatBackend>,
    events: Subscription<AuthEvent>,
    profile_tx: watch::Sender<Option<Profile>>,
}

impl SessionService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let events = backend.auth_events();
        let (profile_tx, _) = watch::channel(None);
        Self {
            backend,
            events,
            profile_tx,
        }
    }

    /// Observers of the active profile. `None` while unauthenticated.
    pub fn subscribe(&self) -> watch::Receiver<Option<Profile>> {
        self.profile_tx.subscribe()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.profile_tx.borrow().clone()
    }

    pub async fn sign_up(
        &mut self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        let session = self.backend.sign_up(display_name, email, password).await?;
        self.process_pending().await;
        Ok(session)
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<AuthSession> {
        let session = self.backend.sign_in(email, password).await?;
        self.process_pending().await;
        Ok(session)
    }

    /// Explicit sign-out: presence goes offline with a fresh last-active
    /// stamp before the session terminates.
    pub async fn sign_out(&mut self) -> Result<()> {
        if let Some(profile) = self.current_profile() {
            if let Err(err) = self.backend.set_presence(profile.id, Presence::Offline).await {
                tracing::warn!(user_id = %profile.id, error = %err, "failed to mark presence offline");
            }
        }
        self.backend.sign_out().await?;
        self.process_pending().await;
        Ok(())
    }

    /// Applies queued auth events without waiting.
    pub async fn process_pending(&mut self) {
        while let Some(event) = self.events.try_recv() {
            self.apply(event).await;
        }
    }

    /// Event loop for long-running use: applies auth events as they arrive
    /// until the stream closes.
    pub async fn run(&mut self) {
        while let Some(event) = self.events.recv().await {
            self.apply(event).await;
        }
    }

    async fn apply(&mut self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn { user_id } => {
                match self.backend.fetch_profile(user_id).await {
                    Ok(Some(mut profile)) => {
                        if let Err(err) =
                            self.backend.set_presence(user_id, Presence::Online).await
                        {
                            tracing::warn!(%user_id, error = %err, "failed to mark presence online");
                        } else {
                            profile.presence = Presence::Online;
                        }
                        self.profile_tx.send_replace(Some(profile));
                        tracing::info!(%user_id, "session established");
                    }
                    Ok(None) => {
                        // No retry: the exposed profile stays unset.
                        tracing::warn!(%user_id, "no profile for authenticated user");
                    }
                    Err(err) => {
                        tracing::warn!(%user_id, error = %err, "profile resolution failed");
                    }
                }
            }
            AuthEvent::SignedOut { user_id } => {
                self.profile_tx.send_replace(None);
                tracing::info!(%user_id, "session terminated");
            }
            AuthEvent::TokenRefreshed { user_id } => {
                // Session continues under the new token; nothing to re-resolve.
                tracing::debug!(%user_id, "access token refreshed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn sign_in_exposes_profile_and_marks_online() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = SessionService::new(backend.clone());

        session.sign_up("alice", "a@x.com", "pw").await.unwrap();
        let profile = session.current_profile().expect("profile exposed");
        assert_eq!(profile.display_name, "alice");
        assert_eq!(profile.presence, Presence::Online);

        let stored = backend
            .fetch_profile(profile.id)
            .await
            .unwrap()
            .expect("stored profile");
        assert_eq!(stored.presence, Presence::Online);
    }

    #[tokio::test]
    async fn sign_out_clears_profile_and_marks_offline() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = SessionService::new(backend.clone());

        let auth = session.sign_up("alice", "a@x.com", "pw").await.unwrap();
        let before = backend
            .fetch_profile(auth.user_id)
            .await
            .unwrap()
            .unwrap()
            .last_active;

        session.sign_out().await.unwrap();
        assert!(session.current_profile().is_none());

        let stored = backend.fetch_profile(auth.user_id).await.unwrap().unwrap();
        assert_eq!(stored.presence, Presence::Offline);
        assert!(stored.last_active >= before);
    }

    #[tokio::test]
    async fn bad_credentials_leave_session_unauthenticated() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = SessionService::new(backend.clone());

        session.sign_up("alice", "a@x.com", "pw").await.unwrap();
        session.sign_out().await.unwrap();

        assert!(session.sign_in("a@x.com", "wrong").await.is_err());
        assert!(session.current_profile().is_none());
    }

    #[tokio::test]
    async fn token_refresh_keeps_the_profile() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = SessionService::new(backend.clone());

        session.sign_up("alice", "a@x.com", "pw").await.unwrap();
        backend.refresh_token();
        session.process_pending().await;

        assert!(session.current_profile().is_some());
    }
}
