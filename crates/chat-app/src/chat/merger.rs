//! Folds streamed reply events into the placeholder message of a mode session.
//!
//! Chunks carry the full text received so far, so each one replaces the
//! placeholder text. Events for an id that is no longer in the store, or for a
//! message that already finished, are ignored.

use super::message::{GroundingReference, MessageId};
use super::session::ModeSession;

pub const ERROR_TEXT_PREFIX: &str = "Error: ";

pub fn error_text(message: &str) -> String {
    format!("{ERROR_TEXT_PREFIX}{message}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Ignored,
}

impl MergeOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl ModeSession {
    pub fn on_chunk(&mut self, id: MessageId, cumulative_text: &str) -> MergeOutcome {
        let Some(message) = self.messages.get_mut(id) else {
            return MergeOutcome::Ignored;
        };
        if !message.is_streaming {
            return MergeOutcome::Ignored;
        }

        if message.text != cumulative_text {
            message.text.clear();
            message.text.push_str(cumulative_text);
        }
        MergeOutcome::Applied
    }

    pub fn on_complete(
        &mut self,
        id: MessageId,
        grounding_references: Option<Vec<GroundingReference>>,
    ) -> MergeOutcome {
        let Some(message) = self.messages.get_mut(id) else {
            return MergeOutcome::Ignored;
        };
        if !message.is_streaming {
            return MergeOutcome::Ignored;
        }

        message.is_streaming = false;
        if let Some(references) = grounding_references.filter(|references| !references.is_empty())
        {
            message.grounding_references = Some(references);
        }
        MergeOutcome::Applied
    }

    pub fn on_error(&mut self, id: MessageId, error_message: &str) -> MergeOutcome {
        let Some(message) = self.messages.get_mut(id) else {
            return MergeOutcome::Ignored;
        };
        if !message.is_streaming {
            return MergeOutcome::Ignored;
        }

        message.is_streaming = false;
        message.text = error_text(error_message);
        self.error = Some(error_message.to_string());
        MergeOutcome::Applied
    }
}
