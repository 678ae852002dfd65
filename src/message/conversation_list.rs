use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::backend::ChatBackend;
use crate::error::Result;
use crate::events::{MessageEvent, MessageFilter, Subscription};
use crate::message::message_dto::{ConversationSummary, LastMessage};
use crate::message::message_models::Message;
use crate::profile::profile_models::Profile;

/// Client-side counterpart of the server-side "latest message per
/// counterpart plus unread count" aggregation: partition the user's
/// messages by counterpart and keep the newest per partition.
pub fn summarize(
    me: Uuid,
    messages: &[Message],
    profiles: &[Profile],
) -> Vec<ConversationSummary> {
    struct Partition<'a> {
        newest: &'a Message,
        unread: usize,
    }

    let mut partitions: HashMap<Uuid, Partition> = HashMap::new();
    for message in messages.iter().filter(|m| m.involves(me)) {
        let counterpart = message.counterpart(me);
        let inbound_unread = (message.receiver_id == me && !message.is_read) as usize;
        partitions
            .entry(counterpart)
            .and_modify(|p| {
                if (message.created_at, message.id) > (p.newest.created_at, p.newest.id) {
                    p.newest = message;
                }
                p.unread += inbound_unread;
            })
            .or_insert(Partition {
                newest: message,
                unread: inbound_unread,
            });
    }

    let mut summaries: Vec<ConversationSummary> = profiles
        .iter()
        .filter(|p| p.id != me)
        .map(|profile| {
            let partition = partitions.get(&profile.id);
            ConversationSummary {
                counterpart_id: profile.id,
                display_name: profile.display_name.clone(),
                avatar_url: profile.avatar_url.clone(),
                last_message: partition.map(|p| LastMessage {
                    body: p.newest.body.clone(),
                    image_url: p.newest.image_url.clone(),
                    sent_at: p.newest.created_at,
                    from_me: p.newest.sender_id == me,
                }),
                unread_count: partition.map(|p| p.unread).unwrap_or(0),
            }
        })
        .collect();

    // Newest-first; counterparts without any messages sort last, by name.
    summaries.sort_by(|a, b| match (&a.last_message, &b.last_message) {
        (Some(x), Some(y)) => y.sent_at.cmp(&x.sent_at),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a
            .display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase()),
    });
    summaries
}

/// Aggregated per-counterpart view for the current user.
#[derive(Clone)]
pub struct ConversationListService {
    backend: Arc<dyn ChatBackend>,
}

impl ConversationListService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn conversations(&self, me: Uuid) -> Result<Vec<ConversationSummary>> {
        let messages = self.backend.fetch_user_messages(me).await?;
        let profiles = self.backend.list_profiles().await?;
        Ok(summarize(me, &messages, &profiles))
    }

    /// Inbound unread across every conversation.
    pub async fn total_unread(&self, me: Uuid) -> Result<usize> {
        let messages = self.backend.fetch_user_messages(me).await?;
        Ok(messages
            .iter()
            .filter(|m| m.receiver_id == me && !m.is_read)
            .count())
    }

    /// Any message event involving the user should trigger a refresh.
    pub fn subscribe_changes(&self, me: Uuid) -> Subscription<MessageEvent> {
        self.backend.subscribe_messages(MessageFilter::Involving(me))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::conversation_view::confirmed_message;
    use chrono::{Duration, Utc};

    fn profile(name: &str) -> Profile {
        Profile::new(Uuid::new_v4(), name).unwrap()
    }

    #[test]
    fn newest_message_and_unread_count_per_counterpart() {
        let me = Uuid::new_v4();
        let bob = profile("bobby");
        let carol = profile("carol");
        let base = Utc::now();

        let messages = vec![
            confirmed_message(bob.id, me, "old", base).unwrap(),
            confirmed_message(bob.id, me, "newer", base + Duration::seconds(5)).unwrap(),
            confirmed_message(me, carol.id, "mine", base + Duration::seconds(2)).unwrap(),
        ];

        let summaries = summarize(me, &messages, &[bob.clone(), carol.clone()]);
        assert_eq!(summaries.len(), 2);

        // Bob's conversation is newest, with two inbound unread.
        assert_eq!(summaries[0].counterpart_id, bob.id);
        assert_eq!(summaries[0].unread_count, 2);
        let last = summaries[0].last_message.as_ref().unwrap();
        assert_eq!(last.body.as_deref(), Some("newer"));
        assert!(!last.from_me);

        // My own outbound message never counts as unread.
        assert_eq!(summaries[1].counterpart_id, carol.id);
        assert_eq!(summaries[1].unread_count, 0);
        assert!(summaries[1].last_message.as_ref().unwrap().from_me);
    }

    #[test]
    fn counterparts_without_messages_sort_last() {
        let me = Uuid::new_v4();
        let bob = profile("bobby");
        let zoe = profile("zoe-quiet");
        let ann = profile("ann-quiet");

        let messages = vec![confirmed_message(bob.id, me, "hi", Utc::now()).unwrap()];
        let summaries = summarize(me, &messages, &[zoe.clone(), bob.clone(), ann.clone()]);

        assert_eq!(summaries[0].counterpart_id, bob.id);
        assert!(summaries[1].last_message.is_none());
        assert_eq!(summaries[1].counterpart_id, ann.id);
        assert_eq!(summaries[2].counterpart_id, zoe.id);
    }

    #[test]
    fn current_user_is_excluded() {
        let me_profile = profile("myself");
        let summaries = summarize(me_profile.id, &[], &[me_profile.clone()]);
        assert!(summaries.is_empty());
    }

    #[test]
    fn read_messages_do_not_count() {
        let me = Uuid::new_v4();
        let bob = profile("bobby");
        let mut msg = confirmed_message(bob.id, me, "seen", Utc::now()).unwrap();
        msg.is_read = true;

        let summaries = summarize(me, &[msg], &[bob]);
        assert_eq!(summaries[0].unread_count, 0);
        assert!(summaries[0].last_message.is_some());
    }
}
