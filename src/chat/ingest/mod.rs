//! Inbound message handling.

pub mod normalizer;

pub use normalizer::{
    RawAttachment, RawContent, RawMessage, RawPart, RawToolInvocation, most_recent_user_message,
    normalize_messages, parse_raw_messages,
};
