use futures::StreamExt;
use rig::completion::message::AssistantContent;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::grounding::{GenerateContentRequest, GenerateContentResponse};
use super::provider::{
    BoxFuture, ChatSession, CompletionsFailedSnafu, DecodeResponseSnafu, EmptyPromptSnafu,
    EmptyResponseSnafu, GroundedAnswer, HttpClientSnafu, HttpRequestSnafu, Location,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult,
    ProviderStreamHandle, ProviderWorker, ResponseStatusSnafu, Role, StreamEventMapped,
    StreamEventPayload, StreamRequest, StreamTarget, TravelGateway, make_event_stream,
};

pub const GEMINI_GATEWAY_NAME: &str = "Gemini";

const API_VERSION_SUFFIX: &str = "/v1beta";

pub struct GeminiGateway {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GeminiGateway {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-gateway-new",
            }
        );

        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        // Rig appends the API version itself, so only the host part is forwarded.
        let base_url = config
            .endpoint
            .strip_suffix(API_VERSION_SUFFIX)
            .unwrap_or(config.endpoint.as_str());
        if !base_url.is_empty() {
            builder = builder.base_url(base_url);
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> RigMessage {
        match message.role {
            Role::User => RigMessage::user(message.content.clone()),
            Role::Assistant => RigMessage::assistant(message.content.clone()),
        }
    }

    async fn generate_grounded(
        &self,
        stage: &'static str,
        model_id: &str,
        request: GenerateContentRequest,
    ) -> ProviderResult<GroundedAnswer> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint, model_id
        );

        tracing::debug!(stage, model_id, "sending grounded generateContent request");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.config.api_key.as_str())
            .json(&request)
            .send()
            .await
            .context(HttpRequestSnafu { stage })?;

        let status = response.status();
        let body = response.text().await.context(HttpRequestSnafu { stage })?;
        if !status.is_success() {
            tracing::warn!(stage, status = status.as_u16(), "grounded request rejected");
            return ResponseStatusSnafu {
                stage,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).context(DecodeResponseSnafu { stage })?;
        let Some(text) = parsed.text() else {
            return EmptyResponseSnafu {
                stage,
                details: parsed.empty_reason(),
            }
            .fail();
        };

        let grounding_references = parsed.grounding_references();
        tracing::debug!(
            stage,
            reference_count = grounding_references.len(),
            "grounded answer received"
        );
        Ok(GroundedAnswer {
            text,
            grounding_references,
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEventMapped {
            target,
            payload: StreamEventPayload::Error(error.to_string()),
        });
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let client = match Self::build_client(&config) {
            Ok(client) => client,
            Err(error) => {
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let model = client.completion_model(request.model_id.clone());
        let history = request
            .history
            .iter()
            .map(Self::to_rig_message)
            .collect::<Vec<_>>();
        let mut builder = model
            .completion_request(RigMessage::user(request.prompt.clone()))
            .messages(history);
        if let Some(preamble) = &request.preamble {
            builder = builder.preamble(preamble.clone());
        }

        let mut stream = match builder.stream().await {
            Ok(stream) => stream,
            Err(source) => {
                tracing::error!(
                    target = ?target,
                    model_id = %request.model_id,
                    error = %source,
                    "failed to open provider stream"
                );
                let error = ProviderError::CompletionsFailed {
                    stage: "open-stream",
                    source,
                };
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let mut reply = CumulativeReply::default();
        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(target = ?target, "provider stream cancelled");
                    stream.cancel();
                    return;
                }
                next_item = stream.next() => {
                    let step = match next_item {
                        Some(Ok(StreamedAssistantContent::Text(text))) => StreamStep::Delta(text.text),
                        Some(Ok(_)) => StreamStep::Skip,
                        Some(Err(source)) => {
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            StreamStep::Failed(ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            })
                        }
                        None => StreamStep::End,
                    };
                    if let Some(payload) = reply.fold(step)
                        && event_tx.send(StreamEventMapped { target, payload }).is_err()
                    {
                        return;
                    }
                    if reply.is_finished() {
                        return;
                    }
                }
            }
        }
    }
}

/// One provider stream item, reduced to what the reply text depends on.
#[derive(Debug)]
enum StreamStep {
    Delta(String),
    Skip,
    Failed(ProviderError),
    End,
}

/// Turns provider deltas into the running reply text. Emits at most one
/// terminal payload; nothing is emitted once finished.
#[derive(Debug, Default)]
struct CumulativeReply {
    text: String,
    finished: bool,
}

impl CumulativeReply {
    fn fold(&mut self, step: StreamStep) -> Option<StreamEventPayload> {
        if self.finished {
            return None;
        }
        match step {
            StreamStep::Skip => None,
            StreamStep::Delta(delta) if delta.is_empty() => None,
            StreamStep::Delta(delta) => {
                self.text.push_str(&delta);
                Some(StreamEventPayload::Text(self.text.clone()))
            }
            StreamStep::Failed(error) => {
                self.finished = true;
                Some(StreamEventPayload::Error(error.to_string()))
            }
            StreamStep::End => {
                self.finished = true;
                Some(StreamEventPayload::Done(Vec::new()))
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

impl TravelGateway for GeminiGateway {
    fn name(&self) -> &str {
        GEMINI_GATEWAY_NAME
    }

    fn send_search_query<'a>(
        &'a self,
        text: &'a str,
    ) -> BoxFuture<'a, ProviderResult<GroundedAnswer>> {
        Box::pin(async move {
            ensure!(
                !text.trim().is_empty(),
                EmptyPromptSnafu {
                    stage: "search-query",
                }
            );

            let request = GenerateContentRequest::search(text, &self.config.system_instruction);
            self.generate_grounded("search-query", &self.config.models.search, request)
                .await
        })
    }

    fn send_maps_query<'a>(
        &'a self,
        text: &'a str,
        location: Option<Location>,
    ) -> BoxFuture<'a, ProviderResult<GroundedAnswer>> {
        Box::pin(async move {
            ensure!(
                !text.trim().is_empty(),
                EmptyPromptSnafu { stage: "maps-query" }
            );

            let request =
                GenerateContentRequest::maps(text, &self.config.system_instruction, location);
            self.generate_grounded("maps-query", &self.config.models.maps, request)
                .await
        })
    }

    fn create_chat_session(&self) -> ChatSession {
        ChatSession::new(
            self.config.models.chat.clone(),
            self.config.system_instruction.clone(),
        )
    }

    fn stream_chat(
        &self,
        session: &ChatSession,
        text: &str,
        target: StreamTarget,
    ) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !text.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "stream-chat",
            }
        );

        let request = StreamRequest::from_session(target, session, text);
        let (event_tx, stream, cancel_rx) = make_event_stream(target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }

    fn send_fast_response<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            ensure!(
                !text.trim().is_empty(),
                EmptyPromptSnafu {
                    stage: "fast-response",
                }
            );

            let client = Self::build_client(&self.config)?;
            let model = client.completion_model(self.config.models.fast.clone());
            let response = model
                .completion_request(RigMessage::user(text.to_string()))
                .preamble(self.config.system_instruction.clone())
                .send()
                .await
                .context(CompletionsFailedSnafu {
                    stage: "fast-response",
                })?;

            let reply = response
                .choice
                .iter()
                .filter_map(|content| match content {
                    AssistantContent::Text(text) => Some(text.text.as_str()),
                    _ => None,
                })
                .collect::<String>();

            ensure!(
                !reply.trim().is_empty(),
                EmptyResponseSnafu {
                    stage: "fast-response",
                    details: "completion carried no text",
                }
            );
            Ok(reply)
        })
    }
}
