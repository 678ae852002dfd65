use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::message::message_models::{ConversationKey, Message};
use crate::profile::profile_models::Profile;

/// Session lifecycle events delivered by the backend's auth stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { user_id: Uuid },
    SignedOut { user_id: Uuid },
    TokenRefreshed { user_id: Uuid },
}

/// Record-change notifications for messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    Inserted(Message),
    Updated(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Inserted(m) | MessageEvent::Updated(m) => m,
        }
    }
}

/// Record-change notifications for profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileEvent {
    Upserted(Profile),
}

/// Scope of a message change feed. Filtering happens at the feed, not in the
/// subscriber: a subscription only ever sees matching events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    /// Both directions of one conversation pair.
    Pair(ConversationKey),
    /// Every message where the user is sender or receiver.
    Involving(Uuid),
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageFilter::Pair(key) => key.matches(message),
            MessageFilter::Involving(user_id) => message.involves(*user_id),
        }
    }
}

/// Transient user-visible failure notice. Never fatal, never auto-retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    SendFailed { detail: String },
    AttachmentRejected { detail: String },
    UploadFailed { detail: String },
}

/// Runs the feed-side unsubscribe when dropped.
pub(crate) struct ReleaseGuard(Option<Box<dyn FnOnce() + Send>>);

impl ReleaseGuard {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    pub(crate) fn noop() -> Self {
        Self(None)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// Handle to a change-notification feed. Carries the unsubscribe capability:
/// dropping the handle detaches it from the feed, so view teardown is just a
/// drop.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    guard: ReleaseGuard,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, guard: ReleaseGuard) -> Self {
        Self { rx, guard }
    }

    /// Next event, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drains without waiting; `None` when no event is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> SubscriptionStream<T> {
        SubscriptionStream {
            inner: UnboundedReceiverStream::new(self.rx),
            _guard: self.guard,
        }
    }
}

pub struct SubscriptionStream<T> {
    inner: UnboundedReceiverStream<T>,
    _guard: ReleaseGuard,
}

impl<T> Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::message_models::MessageDraft;

    #[test]
    fn pair_filter_matches_both_directions_only() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let filter = MessageFilter::Pair(ConversationKey::new(a, b));

        let ab = MessageDraft::text(a, b, "hi").unwrap().into_pending(Uuid::new_v4());
        let ba = MessageDraft::text(b, a, "yo").unwrap().into_pending(Uuid::new_v4());
        let ac = MessageDraft::text(a, c, "ps").unwrap().into_pending(Uuid::new_v4());

        assert!(filter.matches(&ab));
        assert!(filter.matches(&ba));
        assert!(!filter.matches(&ac));
    }

    #[test]
    fn involving_filter_matches_either_role() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let filter = MessageFilter::Involving(a);

        let ab = MessageDraft::text(a, b, "hi").unwrap().into_pending(Uuid::new_v4());
        let ca = MessageDraft::text(c, a, "yo").unwrap().into_pending(Uuid::new_v4());
        let cb = MessageDraft::text(c, b, "ps").unwrap().into_pending(Uuid::new_v4());

        assert!(filter.matches(&ab));
        assert!(filter.matches(&ca));
        assert!(!filter.matches(&cb));
    }

    #[tokio::test]
    async fn dropping_subscription_runs_release() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let (_tx, rx) = mpsc::unbounded_channel::<u8>();
        let sub = Subscription::new(rx, ReleaseGuard::new(move || flag.store(true, Ordering::SeqCst)));

        drop(sub);
        assert!(released.load(Ordering::SeqCst));
    }
}
