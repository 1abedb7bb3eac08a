use snafu::Snafu;
use trilha_llm::ProviderError;

/// Startup failures of the terminal front end. Everything after startup is
/// reported inline in the conversation instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display(
        "no API key configured; set GEMINI_API_KEY, TRILHA_API_KEY or `api_key` in {config_path}"
    ))]
    MissingApiKey {
        stage: &'static str,
        config_path: String,
    },
    #[snafu(display("failed to initialise the {gateway} gateway"))]
    Gateway {
        stage: &'static str,
        gateway: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to read input"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;
