use serde::{Deserialize, Serialize};

pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_SEARCH_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_MAPS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_FAST_MODEL: &str = "gemini-2.5-flash-lite";

/// Model id per assistant mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeModels {
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_search_model")]
    pub search: String,
    #[serde(default = "default_maps_model")]
    pub maps: String,
    #[serde(default = "default_fast_model")]
    pub fast: String,
}

impl Default for ModeModels {
    fn default() -> Self {
        Self {
            chat: default_chat_model(),
            search: default_search_model(),
            maps: default_maps_model(),
            fast: default_fast_model(),
        }
    }
}

impl ModeModels {
    /// Trims every id and swaps blanks for the built-in default.
    pub fn normalized(self) -> Self {
        Self {
            chat: or_default(self.chat, DEFAULT_CHAT_MODEL),
            search: or_default(self.search, DEFAULT_SEARCH_MODEL),
            maps: or_default(self.maps, DEFAULT_MAPS_MODEL),
            fast: or_default(self.fast, DEFAULT_FAST_MODEL),
        }
    }
}

fn or_default(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_search_model() -> String {
    DEFAULT_SEARCH_MODEL.to_string()
}

fn default_maps_model() -> String {
    DEFAULT_MAPS_MODEL.to_string()
}

fn default_fast_model() -> String {
    DEFAULT_FAST_MODEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_model_ids_fall_back_to_defaults() {
        let models = ModeModels {
            chat: "  gemini-2.5-pro ".to_string(),
            search: String::new(),
            maps: "   ".to_string(),
            fast: "custom-lite".to_string(),
        }
        .normalized();

        assert_eq!(models.chat, "gemini-2.5-pro");
        assert_eq!(models.search, DEFAULT_SEARCH_MODEL);
        assert_eq!(models.maps, DEFAULT_MAPS_MODEL);
        assert_eq!(models.fast, "custom-lite");
    }
}
