use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use trilha_llm::{
    DEFAULT_ENDPOINT, DEFAULT_SYSTEM_INSTRUCTION, Location, ModeModels, ProviderConfig,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "trilha";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "TRILHA_";

/// Plain environment variables that may carry the API credential, lowest
/// precedence first.
pub const API_KEY_ENV_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub models: ModeModels,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub location: Option<Location>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            models: ModeModels::default(),
            system_instruction: default_system_instruction(),
            data_dir: None,
            location: None,
        }
    }
}

impl Settings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".trilha"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Defaults, then the JSON settings file, then `TRILHA_*` variables, then
    /// the plain API key variables.
    pub fn figment(config_path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        for name in API_KEY_ENV_VARS {
            figment = figment.merge(Env::raw().only(&[name]).map(|_| "api_key".into()));
        }
        figment
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_config_path())
    }

    pub fn load_from(config_path: &Path) -> Self {
        if !config_path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", config_path);
        }
        Self::from_figment(Self::figment(config_path))
    }

    pub fn from_figment(figment: Figment) -> Self {
        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!("failed to parse settings: {}. using defaults", error);
                Settings::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().trim_end_matches('/').to_string()
        };
        self.system_instruction = if self.system_instruction.trim().is_empty() {
            default_system_instruction()
        } else {
            self.system_instruction.trim().to_string()
        };
        self.models = self.models.normalized();
        self.data_dir = self
            .data_dir
            .filter(|path| !path.as_os_str().is_empty());
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Returns `None` when no API key is configured.
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if !self.is_valid() {
            return None;
        }

        Some(
            ProviderConfig::new(&self.api_key, &self.endpoint)
                .with_models(self.models.clone())
                .with_system_instruction(&self.system_instruction),
        )
    }

    /// Directory holding persisted chat history.
    pub fn history_dir(&self) -> PathBuf {
        if let Some(data_dir) = &self.data_dir {
            return data_dir.clone();
        }

        dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".trilha"))
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}
