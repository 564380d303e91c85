//! Chat orchestration core.
//!
//! A turn flows through the modules in this order:
//! [`ingest`] normalizes the inbound history, [`resolver`] finds or creates
//! the conversation, [`persistence`] stores the user message, [`engine`]
//! streams the model output and runs [`tools`], and [`persistence`] stores
//! what the assistant produced. [`service`] wires them together.

pub mod core;
pub mod engine;
pub mod ingest;
pub mod persistence;
pub mod resolver;
pub mod service;
pub mod storage;
pub mod tools;

pub use self::core::{ChatConfig, ChatError, ChatMessage, ChatResult, ConversationId, UserId};
pub use engine::StreamFrame;
pub use service::{ChatRequest, ChatService, ChatStores, TurnHandle};
