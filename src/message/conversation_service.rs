use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::error::Result;
use crate::events::{MessageEvent, MessageFilter, Notice, Subscription};
use crate::message::attachment::ImageAttachment;
use crate::message::conversation_view::ConversationView;
use crate::message::message_models::{ConversationKey, MessageDraft};

/// Async glue around one [`ConversationView`]: owns the pair-scoped change
/// subscription and drives the backend round-trips. Dropping the service
/// unsubscribes; any round-trip still in flight resolves into a dropped
/// future and no-ops.
pub struct ConversationService {
    backend: Arc<dyn ChatBackend>,
    view: ConversationView,
    subscription: Subscription<MessageEvent>,
}

impl ConversationService {
    /// Opens the conversation: subscribe first (so nothing lands in the
    /// gap), fetch ordered history, then batch-flag inbound unread.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        me: uuid::Uuid,
        counterpart: uuid::Uuid,
    ) -> Result<Self> {
        let key = ConversationKey::new(me, counterpart);
        let subscription = backend.subscribe_messages(MessageFilter::Pair(key));

        let history = backend.fetch_conversation(me, counterpart).await?;
        let mut view = ConversationView::new(me, counterpart);
        view.load_history(history);

        let unread = view.unread_inbound_ids();
        if !unread.is_empty() {
            match backend.mark_conversation_read(me, counterpart).await {
                Ok(flipped) => {
                    tracing::debug!(%counterpart, flipped, "flagged inbound messages read");
                    for id in unread {
                        view.set_read_locally(id);
                    }
                }
                Err(err) => {
                    tracing::warn!(%counterpart, error = %err, "failed to flag conversation read");
                }
            }
        }

        Ok(Self {
            backend,
            view,
            subscription,
        })
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ConversationView {
        &mut self.view
    }

    pub fn set_draft(&mut self, text: &str) {
        self.view.set_draft(text);
    }

    /// The optimistic send path. Failures are caught here: the pending entry
    /// is rolled back, the input restored, and a notice surfaced - never
    /// propagated, never retried.
    pub async fn send(&mut self) {
        let Some((temp_id, draft)) = self.view.begin_send() else {
            return;
        };
        match self.backend.create_message(draft.into()).await {
            Ok(confirmed) => {
                self.view.confirm_send(temp_id, confirmed);
            }
            Err(err) => {
                tracing::error!(error = %err, "message create failed, rolling back");
                self.view.fail_send(temp_id, &err.to_string());
            }
        }
    }

    /// The image path: validate locally, upload, then create the message
    /// carrying the reference. No optimistic placeholder, so failures only
    /// surface a notice.
    pub async fn send_image(&mut self, attachment: ImageAttachment) {
        if let Err(err) = attachment.validate() {
            tracing::warn!(error = %err, file = %attachment.file_name, "attachment rejected");
            self.view.push_notice(Notice::AttachmentRejected {
                detail: err.to_string(),
            });
            return;
        }

        let me = self.view.me();
        let counterpart = self.view.counterpart();
        let path = attachment.storage_path(me);
        let upload = self
            .backend
            .upload_image(&path, &attachment.content_type, attachment.bytes)
            .await;
        let image_url = match upload {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(error = %err, "image upload failed");
                self.view.push_notice(Notice::UploadFailed {
                    detail: err.to_string(),
                });
                return;
            }
        };

        let draft = match MessageDraft::image(me, counterpart, &image_url) {
            Ok(draft) => draft,
            Err(err) => {
                self.view.push_notice(Notice::UploadFailed {
                    detail: err.to_string(),
                });
                return;
            }
        };
        match self.backend.create_message(draft.into()).await {
            Ok(confirmed) => {
                // No pending entry to reconcile; idempotent insert covers
                // the echo notification.
                self.view
                    .apply_event(MessageEvent::Inserted(confirmed));
            }
            Err(err) => {
                tracing::error!(error = %err, "image message create failed");
                self.view.push_notice(Notice::UploadFailed {
                    detail: err.to_string(),
                });
            }
        }
    }

    /// Applies every queued push notification without waiting.
    pub async fn drain_pending(&mut self) {
        while let Some(event) = self.subscription.try_recv() {
            self.apply(event).await;
        }
    }

    /// Waits for the next push notification and applies it. `false` once the
    /// feed has closed.
    pub async fn next_event(&mut self) -> bool {
        match self.subscription.recv().await {
            Some(event) => {
                self.apply(event).await;
                true
            }
            None => false,
        }
    }

    async fn apply(&mut self, event: MessageEvent) {
        if let Some(inbound_id) = self.view.apply_event(event) {
            // New inbound message while the conversation is open: flag it
            // read off the critical path.
            if let Err(err) = self.backend.mark_read(inbound_id).await {
                tracing::warn!(message_id = %inbound_id, error = %err, "failed to flag message read");
            } else {
                self.view.set_read_locally(inbound_id);
            }
        }
    }
}
