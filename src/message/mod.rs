pub mod attachment;
pub mod conversation_list;
pub mod conversation_service;
pub mod conversation_view;
pub mod message_dto;
pub mod message_models;

pub use attachment::{ImageAttachment, MAX_IMAGE_BYTES};
pub use conversation_list::{summarize, ConversationListService};
pub use conversation_service::ConversationService;
pub use conversation_view::{ConversationEntry, ConversationView, Delivery};
pub use message_dto::{ConversationSummary, LastMessage, SendMessageRequest};
pub use message_models::{ConversationKey, Message, MessageDraft};
