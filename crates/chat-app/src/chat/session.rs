use std::fmt;
use std::str::FromStr;

use super::message::MessageStore;

/// The four independent assistant contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Chat,
    Search,
    Maps,
    FastResponse,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Chat, Mode::Search, Mode::Maps, Mode::FastResponse];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Search => "search",
            Self::Maps => "maps",
            Self::FastResponse => "fast",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unknown mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "search" => Ok(Self::Search),
            "maps" => Ok(Self::Maps),
            "fast" | "fast-response" => Ok(Self::FastResponse),
            _ => Err(UnknownMode(raw.to_string())),
        }
    }
}

/// Messages plus request flags for one mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSession {
    pub messages: MessageStore,
    pub loading: bool,
    pub error: Option<String>,
}

impl ModeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: MessageStore) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}
