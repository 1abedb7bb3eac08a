/// Best-effort chat history persistence.
pub mod history;
/// Stream event folding into placeholder messages.
pub mod merger;
/// Message model and per-mode message store.
pub mod message;
/// Modes and the per-mode session state.
pub mod session;

pub use history::{CHAT_HISTORY_KEY, ChatHistory};
pub use merger::{ERROR_TEXT_PREFIX, MergeOutcome, error_text};
pub use message::{AppendRejection, GroundingReference, Message, MessageId, MessageStore, Sender};
pub use session::{Mode, ModeSession, UnknownMode};
