use serde::{Deserialize, Serialize};

pub use trilha_llm::GroundingReference;
pub use trilha_storage::MessageId;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One chat message. Serialized with the camelCase field names used by the
/// persisted history format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_references: Option<Vec<GroundingReference>>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            sender,
            text: text.into(),
            is_streaming: false,
            grounding_references: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    /// Finished assistant reply; an empty reference list is stored as absent.
    pub fn assistant(
        text: impl Into<String>,
        grounding_references: Vec<GroundingReference>,
    ) -> Self {
        let mut message = Self::new(Sender::Assistant, text);
        message.grounding_references =
            (!grounding_references.is_empty()).then_some(grounding_references);
        message
    }

    /// Empty assistant message that stream chunks are merged into.
    pub fn assistant_placeholder() -> Self {
        let mut message = Self::new(Sender::Assistant, String::new());
        message.is_streaming = true;
        message
    }
}

/// Reason a message could not be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendRejection {
    AlreadyStreaming { active: MessageId },
}

/// Ordered messages of one mode. At most one message is streaming at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted messages. Nothing can still be streaming
    /// after a reload, so leftover streaming flags are cleared.
    pub fn restore(mut messages: Vec<Message>) -> Self {
        for message in &mut messages {
            message.is_streaming = false;
        }
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.is_streaming)
    }

    pub fn push(&mut self, message: Message) -> Result<MessageId, AppendRejection> {
        if message.is_streaming
            && let Some(active) = self.streaming_message()
        {
            return Err(AppendRejection::AlreadyStreaming { active: active.id });
        }

        let id = message.id;
        self.messages.push(message);
        Ok(id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
