use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::model::ModeModels;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and knowledgeable travel \
assistant. Help travellers plan trips, discover destinations, and answer practical questions \
about transport, lodging, food, and local customs. Keep answers concise and concrete.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub endpoint: String,
    pub models: ModeModels,
    pub system_instruction: String,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        Self {
            api_key: api_key.into().trim().to_string(),
            endpoint: if endpoint.is_empty() {
                DEFAULT_ENDPOINT.to_string()
            } else {
                endpoint
            },
            models: ModeModels::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    pub fn with_models(mut self, models: ModeModels) -> Self {
        self.models = models.normalized();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        if !instruction.trim().is_empty() {
            self.system_instruction = instruction.trim().to_string();
        }
        self
    }
}

/// Citation attached to a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingReference {
    pub uri: String,
    pub title: String,
}

impl GroundingReference {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundedAnswer {
    pub text: String,
    pub grounding_references: Vec<GroundingReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Opaque multi-turn chat handle. It only accumulates completed exchanges;
/// in-flight turns are carried by the stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    model_id: String,
    preamble: String,
    history: Vec<ProviderMessage>,
}

impl ChatSession {
    pub fn new(model_id: impl Into<String>, preamble: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            preamble: preamble.into(),
            history: Vec::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn history(&self) -> &[ProviderMessage] {
        &self.history
    }

    pub fn record_exchange(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.history.push(ProviderMessage::new(Role::User, prompt));
        self.history.push(ProviderMessage::new(Role::Assistant, reply));
    }
}

/// Routing key for one streamed turn; a new value is minted per submit so
/// events from an abandoned turn can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamTarget(pub u64);

impl StreamTarget {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub model_id: String,
    pub preamble: Option<String>,
    pub history: Vec<ProviderMessage>,
    pub prompt: String,
}

impl StreamRequest {
    pub fn from_session(target: StreamTarget, session: &ChatSession, prompt: impl Into<String>) -> Self {
        let preamble = session.preamble().trim();
        Self {
            target,
            model_id: session.model_id().to_string(),
            preamble: (!preamble.is_empty()).then(|| preamble.to_string()),
            history: session.history().to_vec(),
            prompt: prompt.into(),
        }
    }
}

/// Stream payload. `Text` always carries the full text received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Text(String),
    Done(Vec<GroundingReference>),
    Error(String),
}

impl StreamEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for the generative language API"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("request text is empty"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("generative API returned status {status}: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode generative API response on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("generative API returned no text: {details}"))]
    EmptyResponse {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

pub struct ProviderEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Everything the assistant needs from the generative API.
pub trait TravelGateway: Send + Sync {
    fn name(&self) -> &str;
    fn send_search_query<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<GroundedAnswer>>;
    fn send_maps_query<'a>(
        &'a self,
        text: &'a str,
        location: Option<Location>,
    ) -> BoxFuture<'a, ProviderResult<GroundedAnswer>>;
    fn create_chat_session(&self) -> ChatSession;
    /// Opens a streamed reply. The caller must drive `worker` for events to flow.
    fn stream_chat(
        &self,
        session: &ChatSession,
        text: &str,
        target: StreamTarget,
    ) -> ProviderResult<ProviderStreamHandle>;
    fn send_fast_response<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<String>>;
}

/// Channel pair shared by gateway implementations: the sender half goes to
/// the worker, the receiver half is handed to the caller.
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}
