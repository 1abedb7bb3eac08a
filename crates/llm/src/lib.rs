use std::sync::Arc;

mod gemini_adapter;
pub mod grounding;
mod model;
mod provider;

pub use gemini_adapter::{GEMINI_GATEWAY_NAME, GeminiGateway};
pub use model::{
    DEFAULT_CHAT_MODEL, DEFAULT_FAST_MODEL, DEFAULT_MAPS_MODEL, DEFAULT_SEARCH_MODEL, ModeModels,
};
pub use provider::{
    BoxFuture, ChatSession, DEFAULT_ENDPOINT, DEFAULT_SYSTEM_INSTRUCTION, GroundedAnswer,
    GroundingReference, Location, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role,
    StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget, TravelGateway,
    make_event_stream,
};

pub fn create_gateway(config: ProviderConfig) -> ProviderResult<Arc<dyn TravelGateway>> {
    Ok(Arc::new(GeminiGateway::new(config)?))
}
