pub mod backend;
pub mod error;
pub mod events;
pub mod message;
pub mod profile;
pub mod session;
pub mod state;

pub use backend::{AuthSession, ChatBackend, HttpBackend, MemoryBackend};
pub use error::{AppError, Result};
pub use events::{AuthEvent, MessageEvent, MessageFilter, Notice, ProfileEvent, Subscription};
pub use message::{
    ConversationListService, ConversationService, ConversationView, ImageAttachment, Message,
    MessageDraft,
};
pub use profile::{Presence, Profile, RosterService};
pub use session::SessionService;
pub use state::{AppState, Config};
