use uuid::Uuid;

use crate::error::Result;
use crate::events::{MessageEvent, Notice};
use crate::message::message_models::{ConversationKey, Message, MessageDraft};

/// Delivery state of one visible entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic local entry carrying a client-generated temporary id and a
    /// local-clock timestamp.
    Pending,
    /// Server-confirmed record.
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub message: Message,
    pub delivery: Delivery,
}

/// Per-conversation view state: the ordered visible sequence, the input
/// draft, and accumulated user-visible notices.
///
/// Two producers feed the sequence on the same event loop - the optimistic
/// send path and the push-notification path. Reconciliation is by
/// identifier: confirmation replaces the temporary entry, pushes append
/// idempotently, and a confirmation racing its own push notification
/// collapses to a single entry either way.
pub struct ConversationView {
    me: Uuid,
    counterpart: Uuid,
    entries: Vec<ConversationEntry>,
    draft: String,
    notices: Vec<Notice>,
}

impl ConversationView {
    pub fn new(me: Uuid, counterpart: Uuid) -> Self {
        Self {
            me,
            counterpart,
            entries: Vec::new(),
            draft: String::new(),
            notices: Vec::new(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.me, self.counterpart)
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn counterpart(&self) -> Uuid {
        self.counterpart
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    /// Notices accumulated since the last take. The UI renders and clears.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Replaces the visible sequence with fetched history.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.entries = history
            .into_iter()
            .map(|message| ConversationEntry {
                message,
                delivery: Delivery::Confirmed,
            })
            .collect();
        self.entries
            .sort_by_key(|e| (e.message.created_at, e.message.id));
    }

    /// Inbound entries still unread, to be batch-flagged on open.
    pub fn unread_inbound_ids(&self) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|e| e.message.receiver_id == self.me && !e.message.is_read)
            .map(|e| e.message.id)
            .collect()
    }

    /// Starts the optimistic send path: appends a pending entry under a
    /// temporary id, clears the input, and hands back the draft to create.
    /// Returns `None` when the input holds no sendable text.
    pub fn begin_send(&mut self) -> Option<(Uuid, MessageDraft)> {
        let draft = MessageDraft::text(self.me, self.counterpart, &self.draft).ok()?;
        let temp_id = Uuid::new_v4();
        self.insert_entry(ConversationEntry {
            message: draft.clone().into_pending(temp_id),
            delivery: Delivery::Pending,
        });
        self.draft.clear();
        Some((temp_id, draft))
    }

    /// Create succeeded: the pending entry is replaced by the confirmed
    /// record. If the push notification for the same record won the race,
    /// the pending entry is simply dropped - exactly one entry survives.
    pub fn confirm_send(&mut self, temp_id: Uuid, confirmed: Message) {
        self.remove_entry(temp_id);
        self.insert_if_absent(confirmed);
    }

    /// Create failed: roll back the pending entry, restore the input so the
    /// user may retry, and surface a notice. Returns the restored text.
    pub fn fail_send(&mut self, temp_id: Uuid, detail: &str) -> Option<String> {
        let removed = self.remove_entry(temp_id)?;
        let restored = removed.message.body.unwrap_or_default();
        self.draft = restored.clone();
        self.notices.push(Notice::SendFailed {
            detail: detail.to_string(),
        });
        Some(restored)
    }

    /// Applies a push notification. Returns the id of a newly arrived
    /// inbound message still unread, which the caller flags read
    /// asynchronously; `None` otherwise (duplicates are discarded).
    pub fn apply_event(&mut self, event: MessageEvent) -> Option<Uuid> {
        match event {
            MessageEvent::Inserted(message) => {
                if !self.insert_if_absent(message.clone()) {
                    return None;
                }
                (message.receiver_id == self.me && !message.is_read).then_some(message.id)
            }
            MessageEvent::Updated(message) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| e.message.id == message.id)
                {
                    entry.message.is_read = message.is_read;
                    entry.message.updated_at = message.updated_at;
                }
                None
            }
        }
    }

    /// Flips the local read flag, used after a batch mark-read round-trip
    /// resolves before its individual update notifications arrive.
    pub fn set_read_locally(&mut self, message_id: Uuid) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == message_id)
        {
            entry.message.is_read = true;
        }
    }

    fn insert_if_absent(&mut self, message: Message) -> bool {
        if self.entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }
        self.insert_entry(ConversationEntry {
            message,
            delivery: Delivery::Confirmed,
        });
        true
    }

    // Keeps the sequence ordered by (created_at, id) ascending.
    fn insert_entry(&mut self, entry: ConversationEntry) {
        let sort_key = (entry.message.created_at, entry.message.id);
        let at = self
            .entries
            .partition_point(|e| (e.message.created_at, e.message.id) <= sort_key);
        self.entries.insert(at, entry);
    }

    fn remove_entry(&mut self, id: Uuid) -> Option<ConversationEntry> {
        let at = self.entries.iter().position(|e| e.message.id == id)?;
        Some(self.entries.remove(at))
    }
}

/// Convenience constructor used by tests and previews.
pub fn confirmed_message(
    sender_id: Uuid,
    receiver_id: Uuid,
    body: &str,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<Message> {
    let draft = MessageDraft::text(sender_id, receiver_id, body)?;
    let mut message = draft.into_pending(Uuid::new_v4());
    message.created_at = created_at;
    message.updated_at = created_at;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn view() -> (ConversationView, Uuid, Uuid) {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        (ConversationView::new(me, other), me, other)
    }

    fn bodies(view: &ConversationView) -> Vec<&str> {
        view.entries()
            .iter()
            .map(|e| e.message.body.as_deref().unwrap_or(""))
            .collect()
    }

    #[test]
    fn submit_appends_pending_and_clears_input() {
        let (mut view, _, _) = view();
        view.set_draft("hi");
        let (temp_id, _) = view.begin_send().unwrap();

        assert_eq!(view.draft(), "");
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.entries()[0].delivery, Delivery::Pending);
        assert_eq!(view.entries()[0].message.id, temp_id);
    }

    #[test]
    fn empty_input_is_not_sendable() {
        let (mut view, _, _) = view();
        view.set_draft("   ");
        assert!(view.begin_send().is_none());
        assert!(view.entries().is_empty());
    }

    #[test]
    fn confirm_before_push_leaves_exactly_one_entry() {
        let (mut view, me, other) = view();
        view.set_draft("hi");
        let (temp_id, _) = view.begin_send().unwrap();

        let confirmed = confirmed_message(me, other, "hi", Utc::now()).unwrap();
        view.confirm_send(temp_id, confirmed.clone());
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.entries()[0].delivery, Delivery::Confirmed);

        // The echo push for the same record must not duplicate it.
        assert!(view.apply_event(MessageEvent::Inserted(confirmed)).is_none());
        assert_eq!(view.entries().len(), 1);
    }

    #[test]
    fn push_before_confirm_leaves_exactly_one_entry() {
        let (mut view, me, other) = view();
        view.set_draft("hi");
        let (temp_id, _) = view.begin_send().unwrap();

        let confirmed = confirmed_message(me, other, "hi", Utc::now()).unwrap();
        view.apply_event(MessageEvent::Inserted(confirmed.clone()));
        assert_eq!(view.entries().len(), 2); // pending + pushed

        view.confirm_send(temp_id, confirmed.clone());
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.entries()[0].message.id, confirmed.id);
    }

    #[test]
    fn duplicate_push_is_discarded() {
        let (mut view, me, other) = view();
        let msg = confirmed_message(other, me, "hello", Utc::now()).unwrap();

        assert_eq!(view.apply_event(MessageEvent::Inserted(msg.clone())), Some(msg.id));
        assert!(view.apply_event(MessageEvent::Inserted(msg)).is_none());
        assert_eq!(view.entries().len(), 1);
    }

    #[test]
    fn sequence_is_timestamp_ordered_regardless_of_arrival() {
        let (mut view, me, other) = view();
        let base = Utc::now();
        let m1 = confirmed_message(other, me, "t1", base).unwrap();
        let m2 = confirmed_message(me, other, "t2", base + Duration::seconds(1)).unwrap();
        let m3 = confirmed_message(other, me, "t3", base + Duration::seconds(2)).unwrap();

        for msg in [m3.clone(), m1.clone(), m2.clone()] {
            view.apply_event(MessageEvent::Inserted(msg));
        }
        assert_eq!(bodies(&view), vec!["t1", "t2", "t3"]);

        let mut reordered = ConversationView::new(me, other);
        for msg in [m2, m3, m1] {
            reordered.apply_event(MessageEvent::Inserted(msg));
        }
        assert_eq!(bodies(&reordered), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn failed_send_rolls_back_restores_input_and_surfaces_notice() {
        let (mut view, _, _) = view();
        view.set_draft("hi");
        let (temp_id, _) = view.begin_send().unwrap();
        assert_eq!(view.entries().len(), 1);

        let restored = view.fail_send(temp_id, "simulated create failure");
        assert_eq!(restored.as_deref(), Some("hi"));
        assert!(view.entries().is_empty());
        assert_eq!(view.draft(), "hi");

        let notices = view.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], Notice::SendFailed { .. }));
        assert!(view.take_notices().is_empty());
    }

    #[test]
    fn update_event_flips_read_flag() {
        let (mut view, me, other) = view();
        let msg = confirmed_message(me, other, "hi", Utc::now()).unwrap();
        view.apply_event(MessageEvent::Inserted(msg.clone()));
        assert!(!view.entries()[0].message.is_read);

        let mut read = msg;
        read.is_read = true;
        view.apply_event(MessageEvent::Updated(read));
        assert!(view.entries()[0].message.is_read);
    }

    #[test]
    fn inbound_unread_are_reported_for_batch_flagging() {
        let (mut view, me, other) = view();
        let base = Utc::now();
        let inbound = confirmed_message(other, me, "a", base).unwrap();
        let outbound = confirmed_message(me, other, "b", base + Duration::seconds(1)).unwrap();
        let mut seen = confirmed_message(other, me, "c", base + Duration::seconds(2)).unwrap();
        seen.is_read = true;

        view.load_history(vec![inbound.clone(), outbound, seen]);
        assert_eq!(view.unread_inbound_ids(), vec![inbound.id]);

        view.set_read_locally(inbound.id);
        assert!(view.unread_inbound_ids().is_empty());
    }
}
