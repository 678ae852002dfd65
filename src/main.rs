use std::sync::Arc;

use pairchat::backend::{ChatBackend, HttpBackend, MemoryBackend};
use pairchat::message::ConversationService;
use pairchat::session::SessionService;
use pairchat::state::{AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scripted walkthrough of the client core: two users sign up, exchange
/// messages, and the conversation list reflects the unread transitions.
/// Runs against the in-memory backend unless CHAT_BACKEND_URL points at a
/// hosted one. Everything happens on a single-threaded event loop.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pairchat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend: Arc<dyn ChatBackend> = if std::env::var("CHAT_BACKEND_URL").is_ok() {
        let config = Config::from_env();
        tracing::info!(url = %config.backend_url, "using hosted backend");
        Arc::new(HttpBackend::new(&config))
    } else {
        tracing::info!("using in-memory backend");
        Arc::new(MemoryBackend::new())
    };

    let mut alice = SessionService::new(backend.clone());
    let alice_auth = alice.sign_up("alice", "alice@example.com", "wonderland").await?;
    tracing::info!(user_id = %alice_auth.user_id, "alice signed up");
    alice.sign_out().await?;

    let mut bob = SessionService::new(backend.clone());
    let bob_auth = bob.sign_up("bobby", "bob@example.com", "builder").await?;
    tracing::info!(user_id = %bob_auth.user_id, "bob signed up");

    let mut bob_conversation =
        ConversationService::open(backend.clone(), bob_auth.user_id, alice_auth.user_id).await?;
    for text in ["hi alice", "are you around?", "ping me back"] {
        bob_conversation.set_draft(text);
        bob_conversation.send().await;
    }
    tracing::info!(
        sent = bob_conversation.view().entries().len(),
        "bob sent messages"
    );
    drop(bob_conversation);
    bob.sign_out().await?;

    let mut state = AppState::new(backend.clone());
    state.session.sign_in("alice@example.com", "wonderland").await?;
    let me = state
        .session
        .current_profile()
        .expect("alice profile resolved")
        .id;

    for summary in state.conversation_list.conversations(me).await? {
        tracing::info!(
            counterpart = %summary.display_name,
            unread = summary.unread_count,
            last = summary
                .last_message
                .as_ref()
                .and_then(|m| m.body.as_deref())
                .unwrap_or("-"),
            "conversation"
        );
    }

    // Opening the conversation batch-flags bob's messages as read.
    let mut conversation =
        ConversationService::open(backend.clone(), me, bob_auth.user_id).await?;
    conversation.set_draft("hey bob, here now");
    conversation.send().await;
    conversation.drain_pending().await;

    for entry in conversation.view().entries() {
        tracing::info!(
            from_me = entry.message.sender_id == me,
            read = entry.message.is_read,
            body = entry.message.body.as_deref().unwrap_or("[image]"),
            "entry"
        );
    }

    let unread = state.conversation_list.total_unread(me).await?;
    tracing::info!(unread, "alice's remaining unread");

    state.session.sign_out().await?;
    Ok(())
}
