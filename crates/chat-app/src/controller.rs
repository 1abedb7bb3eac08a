use std::sync::Arc;

use trilha_llm::{
    ChatSession, GroundedAnswer, ProviderEventStream, ProviderResult, ProviderWorker,
    StreamEventMapped, StreamEventPayload, StreamTarget, TravelGateway,
};

use crate::chat::{
    ChatHistory, MergeOutcome, Message, MessageId, Mode, ModeSession, error_text,
};
use crate::location::{LocationProvider, LocationState};

pub const LOCATION_PENDING_MESSAGE: &str =
    "your location is still being determined; please try again in a moment";

pub const STREAM_CLOSED_MESSAGE: &str = "provider stream ended before a terminal event";

/// Lifecycle of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatTurnState {
    #[default]
    Idle,
    Sending,
    Streaming,
}

/// Why a submission was refused without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    EmptyInput,
    Busy(Mode),
}

/// Coordinator-level stream metadata kept outside the message model.
struct ActiveStream {
    target: StreamTarget,
    placeholder_id: MessageId,
    prompt: String,
    events: ProviderEventStream,
}

/// Owns one session per mode and routes user input to the gateway.
pub struct ModeController {
    gateway: Arc<dyn TravelGateway>,
    chat: ModeSession,
    search: ModeSession,
    maps: ModeSession,
    fast: ModeSession,
    chat_session: ChatSession,
    history: Option<ChatHistory>,
    location: LocationState,
    turn_state: ChatTurnState,
    active_stream: Option<ActiveStream>,
    next_stream_target: StreamTarget,
}

impl ModeController {
    /// Restores chat history (if any) and opens a fresh chat session.
    pub fn new(gateway: Arc<dyn TravelGateway>, history: Option<ChatHistory>) -> Self {
        let chat_messages = history
            .as_ref()
            .map(ChatHistory::load)
            .unwrap_or_default();
        let chat_session = gateway.create_chat_session();

        tracing::info!(
            gateway = gateway.name(),
            restored_messages = chat_messages.len(),
            "mode controller initialised"
        );

        Self {
            gateway,
            chat: ModeSession::with_messages(chat_messages),
            search: ModeSession::new(),
            maps: ModeSession::new(),
            fast: ModeSession::new(),
            chat_session,
            history,
            location: LocationState::Pending,
            turn_state: ChatTurnState::Idle,
            active_stream: None,
            next_stream_target: StreamTarget::new(1),
        }
    }

    pub fn session(&self, mode: Mode) -> &ModeSession {
        match mode {
            Mode::Chat => &self.chat,
            Mode::Search => &self.search,
            Mode::Maps => &self.maps,
            Mode::FastResponse => &self.fast,
        }
    }

    fn session_mut(&mut self, mode: Mode) -> &mut ModeSession {
        match mode {
            Mode::Chat => &mut self.chat,
            Mode::Search => &mut self.search,
            Mode::Maps => &mut self.maps,
            Mode::FastResponse => &mut self.fast,
        }
    }

    pub fn turn_state(&self) -> ChatTurnState {
        self.turn_state
    }

    pub fn chat_session(&self) -> &ChatSession {
        &self.chat_session
    }

    pub fn location_state(&self) -> &LocationState {
        &self.location
    }

    pub async fn resolve_location(&mut self, provider: &dyn LocationProvider) {
        self.location = LocationState::Pending;
        let state = LocationState::from_result(provider.resolve().await);
        match &state {
            LocationState::Resolved(location) => tracing::debug!(
                latitude = location.latitude,
                longitude = location.longitude,
                "device location resolved"
            ),
            LocationState::Failed(reason) => {
                tracing::warn!(reason = %reason, "device location unavailable")
            }
            LocationState::Pending => {}
        }
        self.location = state;
    }

    /// Validates input and flips the mode into its loading state.
    fn begin_request(&mut self, mode: Mode, text: &str) -> Result<String, SubmitRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitRejection::EmptyInput);
        }

        let session = self.session_mut(mode);
        if session.loading {
            return Err(SubmitRejection::Busy(mode));
        }

        session.loading = true;
        session.error = None;
        Ok(text.to_string())
    }

    fn persist_chat(&self) {
        if let Some(history) = &self.history {
            history.save(&self.chat.messages);
        }
    }

    /// Appends the user message and reply placeholder, then opens the stream.
    ///
    /// Returns the provider worker, which the caller must drive (join or spawn)
    /// while feeding [`Self::pump_chat_stream`]. `Ok(None)` means the gateway
    /// refused the request and the failure was already written to the reply.
    pub fn start_chat_turn(
        &mut self,
        text: &str,
    ) -> Result<Option<ProviderWorker>, SubmitRejection> {
        if self.active_stream.is_some() {
            return Err(SubmitRejection::Busy(Mode::Chat));
        }
        let prompt = self.begin_request(Mode::Chat, text)?;

        let placeholder_id = match self.append_turn_messages(&prompt) {
            Some(placeholder_id) => placeholder_id,
            None => {
                self.chat.loading = false;
                return Err(SubmitRejection::Busy(Mode::Chat));
            }
        };
        self.turn_state = ChatTurnState::Sending;
        self.persist_chat();

        let target = self.next_stream_target;
        // Reserve the next target immediately so later turns never reuse one.
        self.next_stream_target = target.next();

        match self.gateway.stream_chat(&self.chat_session, &prompt, target) {
            Ok(handle) => {
                tracing::debug!(target = ?target, message_id = %placeholder_id, "chat stream opened");
                self.active_stream = Some(ActiveStream {
                    target,
                    placeholder_id,
                    prompt,
                    events: handle.stream,
                });
                Ok(Some(handle.worker))
            }
            Err(error) => {
                tracing::warn!(target = ?target, error = %error, "failed to open chat stream");
                self.chat.on_error(placeholder_id, &error.to_string());
                self.finish_chat_turn();
                self.persist_chat();
                Ok(None)
            }
        }
    }

    fn append_turn_messages(&mut self, prompt: &str) -> Option<MessageId> {
        if let Some(active) = self.chat.messages.streaming_message() {
            tracing::warn!(message_id = %active.id, "refusing chat turn while a reply is streaming");
            return None;
        }

        // No message is streaming here, so neither push can be rejected.
        self.chat.messages.push(Message::user(prompt)).ok()?;
        self.chat
            .messages
            .push(Message::assistant_placeholder())
            .ok()
    }

    fn finish_chat_turn(&mut self) {
        self.active_stream = None;
        self.chat.loading = false;
        self.turn_state = ChatTurnState::Idle;
    }

    /// Applies one provider event to the in-flight chat turn. Events for any
    /// other target are dropped.
    pub fn apply_stream_event(&mut self, event: StreamEventMapped) -> MergeOutcome {
        let Some(active) = self.active_stream.as_ref() else {
            tracing::debug!(target = ?event.target, "dropping stream event with no active turn");
            return MergeOutcome::Ignored;
        };
        if active.target != event.target {
            tracing::debug!(
                active = ?active.target,
                target = ?event.target,
                "dropping stale stream event"
            );
            return MergeOutcome::Ignored;
        }
        let placeholder_id = active.placeholder_id;

        let outcome = match event.payload {
            StreamEventPayload::Text(text) => {
                self.turn_state = ChatTurnState::Streaming;
                self.chat.on_chunk(placeholder_id, &text)
            }
            StreamEventPayload::Done(references) => {
                let outcome = self.chat.on_complete(placeholder_id, Some(references));
                if outcome.is_applied() {
                    self.record_completed_exchange(placeholder_id);
                }
                self.finish_chat_turn();
                outcome
            }
            StreamEventPayload::Error(message) => {
                tracing::warn!(message_id = %placeholder_id, error = %message, "chat stream failed");
                let outcome = self.chat.on_error(placeholder_id, &message);
                self.finish_chat_turn();
                outcome
            }
        };

        if outcome.is_applied() {
            self.persist_chat();
        }
        outcome
    }

    fn record_completed_exchange(&mut self, placeholder_id: MessageId) {
        let Some(active) = self.active_stream.as_ref() else {
            return;
        };
        let Some(reply) = self.chat.messages.get(placeholder_id) else {
            return;
        };
        self.chat_session
            .record_exchange(active.prompt.clone(), reply.text.clone());
    }

    /// Waits for the next event of the in-flight turn and applies it.
    ///
    /// Returns the placeholder id the event addressed, or `None` once no turn
    /// is active. A stream that closes without a terminal event fails the turn.
    pub async fn pump_chat_stream(&mut self) -> Option<MessageId> {
        let (placeholder_id, target, next_event) = {
            let active = self.active_stream.as_mut()?;
            (active.placeholder_id, active.target, active.events.recv().await)
        };

        match next_event {
            Some(event) => {
                self.apply_stream_event(event);
            }
            None => {
                self.apply_stream_event(StreamEventMapped {
                    target,
                    payload: StreamEventPayload::Error(STREAM_CLOSED_MESSAGE.to_string()),
                });
            }
        }
        Some(placeholder_id)
    }

    /// Runs a full chat turn, calling `on_update` with the reply after every
    /// applied event. The reply may be gone if history was cleared meanwhile.
    pub async fn submit_chat<F>(&mut self, text: &str, mut on_update: F) -> Result<(), SubmitRejection>
    where
        F: FnMut(Option<&Message>),
    {
        let Some(worker) = self.start_chat_turn(text)? else {
            let reply = self.chat.messages.last();
            on_update(reply);
            return Ok(());
        };

        let pump = async {
            while let Some(placeholder_id) = self.pump_chat_stream().await {
                on_update(self.chat.messages.get(placeholder_id));
            }
        };
        futures::future::join(worker, pump).await;
        Ok(())
    }

    /// Empties chat history, drops the persisted copy and starts a new chat
    /// session. An in-flight reply keeps running but its events become no-ops.
    pub fn clear_chat_history(&mut self) {
        self.chat.messages.clear();
        self.chat.error = None;
        self.chat_session = self.gateway.create_chat_session();
        if let Some(history) = &self.history {
            history.clear();
        }
        tracing::info!("chat history cleared");
    }

    pub async fn submit_search(&mut self, text: &str) -> Result<(), SubmitRejection> {
        let prompt = self.begin_request(Mode::Search, text)?;
        self.append_user_message(Mode::Search, &prompt);

        let gateway = Arc::clone(&self.gateway);
        let result = gateway.send_search_query(&prompt).await;
        self.finish_grounded_request(Mode::Search, result);
        Ok(())
    }

    /// Needs a settled location state: resolved positions are sent along,
    /// failed resolution sends the query without one, and a pending one fails
    /// the request inline.
    pub async fn submit_maps(&mut self, text: &str) -> Result<(), SubmitRejection> {
        let prompt = self.begin_request(Mode::Maps, text)?;
        self.append_user_message(Mode::Maps, &prompt);

        let location = match &self.location {
            LocationState::Pending => {
                self.fail_request(Mode::Maps, LOCATION_PENDING_MESSAGE.to_string());
                return Ok(());
            }
            LocationState::Resolved(location) => Some(*location),
            LocationState::Failed(reason) => {
                tracing::debug!(reason = %reason, "sending maps query without a location");
                None
            }
        };

        let gateway = Arc::clone(&self.gateway);
        let result = gateway.send_maps_query(&prompt, location).await;
        self.finish_grounded_request(Mode::Maps, result);
        Ok(())
    }

    pub async fn submit_fast_response(&mut self, text: &str) -> Result<(), SubmitRejection> {
        let prompt = self.begin_request(Mode::FastResponse, text)?;
        self.append_user_message(Mode::FastResponse, &prompt);

        let gateway = Arc::clone(&self.gateway);
        let result = gateway
            .send_fast_response(&prompt)
            .await
            .map(|text| GroundedAnswer {
                text,
                grounding_references: Vec::new(),
            });
        self.finish_grounded_request(Mode::FastResponse, result);
        Ok(())
    }

    /// Routes text to whichever handler owns `mode`.
    pub async fn submit<F>(&mut self, mode: Mode, text: &str, on_update: F) -> Result<(), SubmitRejection>
    where
        F: FnMut(Option<&Message>),
    {
        match mode {
            Mode::Chat => self.submit_chat(text, on_update).await,
            Mode::Search => self.submit_search(text).await,
            Mode::Maps => self.submit_maps(text).await,
            Mode::FastResponse => self.submit_fast_response(text).await,
        }
    }

    fn append_user_message(&mut self, mode: Mode, prompt: &str) {
        // User messages never stream, so the store cannot reject them.
        let _ = self.session_mut(mode).messages.push(Message::user(prompt));
    }

    fn finish_grounded_request(&mut self, mode: Mode, result: ProviderResult<GroundedAnswer>) {
        match result {
            Ok(answer) => {
                let session = self.session_mut(mode);
                let _ = session
                    .messages
                    .push(Message::assistant(answer.text, answer.grounding_references));
                session.loading = false;
            }
            Err(error) => {
                tracing::warn!(mode = %mode, error = %error, "request failed");
                self.fail_request(mode, error.to_string());
            }
        }
    }

    fn fail_request(&mut self, mode: Mode, message: String) {
        let session = self.session_mut(mode);
        let _ = session
            .messages
            .push(Message::assistant(error_text(&message), Vec::new()));
        session.error = Some(message);
        session.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use trilha_llm::{
        BoxFuture, GroundingReference, Location, ProviderError, ProviderStreamHandle,
        make_event_stream,
    };
    use trilha_storage::{KeyValueStore, MemoryStore};

    use super::*;
    use crate::chat::{CHAT_HISTORY_KEY, Sender};

    /// Scripted gateway: chat streams replay the queued payloads, and the
    /// single-shot calls pop queued results.
    #[derive(Default)]
    struct ScriptedGateway {
        streams: Mutex<VecDeque<Vec<StreamEventPayload>>>,
        answers: Mutex<VecDeque<ProviderResult<GroundedAnswer>>>,
        fast_replies: Mutex<VecDeque<ProviderResult<String>>>,
        refuse_stream: Mutex<bool>,
        maps_locations: Mutex<Vec<Option<Location>>>,
        stream_histories: Mutex<Vec<usize>>,
    }

    impl ScriptedGateway {
        fn with_stream(payloads: Vec<StreamEventPayload>) -> Arc<Self> {
            let gateway = Self::default();
            gateway.streams.lock().unwrap().push_back(payloads);
            Arc::new(gateway)
        }

        fn with_answer(answer: ProviderResult<GroundedAnswer>) -> Arc<Self> {
            let gateway = Self::default();
            gateway.answers.lock().unwrap().push_back(answer);
            Arc::new(gateway)
        }

        fn next_answer(&self) -> ProviderResult<GroundedAnswer> {
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .expect("test queued an answer")
        }
    }

    impl TravelGateway for ScriptedGateway {
        fn name(&self) -> &str {
            "scripted"
        }

        fn send_search_query<'a>(
            &'a self,
            _text: &'a str,
        ) -> BoxFuture<'a, ProviderResult<GroundedAnswer>> {
            let answer = self.next_answer();
            Box::pin(async move { answer })
        }

        fn send_maps_query<'a>(
            &'a self,
            _text: &'a str,
            location: Option<Location>,
        ) -> BoxFuture<'a, ProviderResult<GroundedAnswer>> {
            self.maps_locations.lock().unwrap().push(location);
            let answer = self.next_answer();
            Box::pin(async move { answer })
        }

        fn create_chat_session(&self) -> ChatSession {
            ChatSession::new("scripted-chat", "")
        }

        fn stream_chat(
            &self,
            session: &ChatSession,
            _text: &str,
            target: StreamTarget,
        ) -> ProviderResult<ProviderStreamHandle> {
            if *self.refuse_stream.lock().unwrap() {
                return Err(ProviderError::EmptyResponse {
                    stage: "scripted-stream",
                    details: "refused".to_string(),
                });
            }
            self.stream_histories
                .lock()
                .unwrap()
                .push(session.history().len());

            let payloads = self.streams.lock().unwrap().pop_front().unwrap_or_default();
            let (event_tx, stream, _cancel_rx) = make_event_stream(target);
            let worker: ProviderWorker = Box::pin(async move {
                for payload in payloads {
                    if event_tx.send(StreamEventMapped { target, payload }).is_err() {
                        return;
                    }
                }
            });
            Ok(ProviderStreamHandle { stream, worker })
        }

        fn send_fast_response<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
            let reply = self
                .fast_replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("test queued a fast reply");
            Box::pin(async move { reply })
        }
    }

    fn text(value: &str) -> StreamEventPayload {
        StreamEventPayload::Text(value.to_string())
    }

    fn controller_with_history(gateway: Arc<ScriptedGateway>) -> (ModeController, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let controller = ModeController::new(gateway, Some(ChatHistory::new(store.clone())));
        (controller, store)
    }

    fn persisted(store: &MemoryStore) -> Vec<Message> {
        store
            .get_item(CHAT_HISTORY_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
            .unwrap_or_default()
    }

    fn upstream_failure() -> ProviderError {
        ProviderError::ResponseStatus {
            stage: "scripted",
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn chat_turn_streams_into_placeholder_and_completes() {
        let gateway = ScriptedGateway::with_stream(vec![
            text("Ol"),
            text("Olá"),
            StreamEventPayload::Done(Vec::new()),
        ]);
        let (mut controller, store) = controller_with_history(gateway);

        let mut seen = Vec::new();
        controller
            .submit_chat("  Oi ", |reply| {
                if let Some(reply) = reply {
                    seen.push((reply.text.clone(), reply.is_streaming));
                }
            })
            .await
            .unwrap();

        let chat = controller.session(Mode::Chat);
        let messages = chat.messages.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "Oi");
        assert_eq!(messages[1].sender, Sender::Assistant);
        assert_eq!(messages[1].text, "Olá");
        assert!(!messages[1].is_streaming);
        assert!(!chat.loading);
        assert_eq!(chat.error, None);
        assert_eq!(controller.turn_state(), ChatTurnState::Idle);
        assert_eq!(
            seen,
            vec![
                ("Ol".to_string(), true),
                ("Olá".to_string(), true),
                ("Olá".to_string(), false),
            ]
        );
        assert_eq!(persisted(&store), messages.to_vec());
    }

    #[tokio::test]
    async fn start_appends_user_message_and_placeholder() {
        let gateway = ScriptedGateway::with_stream(vec![StreamEventPayload::Done(Vec::new())]);
        let (mut controller, _store) = controller_with_history(gateway);

        let worker = controller.start_chat_turn("Oi").unwrap();
        assert!(worker.is_some());

        let chat = controller.session(Mode::Chat);
        assert!(chat.loading);
        assert_eq!(controller.turn_state(), ChatTurnState::Sending);
        let placeholder = chat.messages.last().unwrap();
        assert_eq!(placeholder.sender, Sender::Assistant);
        assert!(placeholder.is_streaming);
        assert_eq!(placeholder.text, "");
        assert_eq!(chat.messages.messages()[0].text, "Oi");
    }

    #[tokio::test]
    async fn first_chunk_moves_turn_to_streaming() {
        let gateway = ScriptedGateway::with_stream(vec![text("Olá"), StreamEventPayload::Done(Vec::new())]);
        let (mut controller, _store) = controller_with_history(gateway);

        let worker = controller.start_chat_turn("Oi").unwrap().unwrap();
        worker.await;

        controller.pump_chat_stream().await.unwrap();
        assert_eq!(controller.turn_state(), ChatTurnState::Streaming);
        assert_eq!(controller.session(Mode::Chat).messages.streaming_message().unwrap().text, "Olá");

        controller.pump_chat_stream().await.unwrap();
        assert_eq!(controller.turn_state(), ChatTurnState::Idle);
        assert!(controller.pump_chat_stream().await.is_none());
    }

    #[tokio::test]
    async fn blank_or_concurrent_submissions_are_rejected() {
        let gateway = ScriptedGateway::with_stream(vec![StreamEventPayload::Done(Vec::new())]);
        let (mut controller, _store) = controller_with_history(gateway);

        assert_eq!(
            controller.start_chat_turn("   ").err(),
            Some(SubmitRejection::EmptyInput)
        );
        assert!(controller.session(Mode::Chat).messages.is_empty());

        let _worker = controller.start_chat_turn("Oi").unwrap();
        assert_eq!(
            controller.start_chat_turn("again").err(),
            Some(SubmitRejection::Busy(Mode::Chat))
        );
        assert_eq!(controller.session(Mode::Chat).messages.len(), 2);
        assert!(controller.session(Mode::Chat).messages.streaming_message().is_some());
    }

    #[tokio::test]
    async fn stream_error_marks_reply_and_surfaces_error() {
        let gateway = ScriptedGateway::with_stream(vec![
            text("partial"),
            StreamEventPayload::Error("quota exceeded".to_string()),
        ]);
        let (mut controller, store) = controller_with_history(gateway);

        controller.submit_chat("Oi", |_| {}).await.unwrap();

        let chat = controller.session(Mode::Chat);
        let reply = chat.messages.last().unwrap();
        assert_eq!(reply.text, "Error: quota exceeded");
        assert!(!reply.is_streaming);
        assert_eq!(chat.error.as_deref(), Some("quota exceeded"));
        assert!(!chat.loading);
        assert_eq!(persisted(&store).last().unwrap().text, "Error: quota exceeded");
    }

    #[tokio::test]
    async fn refused_stream_fails_the_turn_inline() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.refuse_stream.lock().unwrap() = true;
        let (mut controller, _store) = controller_with_history(gateway);

        let mut updates = 0;
        controller
            .submit_chat("Oi", |reply| {
                updates += 1;
                assert!(reply.unwrap().text.starts_with("Error: "));
            })
            .await
            .unwrap();

        let chat = controller.session(Mode::Chat);
        assert_eq!(updates, 1);
        assert!(!chat.loading);
        assert!(chat.error.is_some());
        assert!(chat.messages.streaming_message().is_none());
        assert_eq!(controller.turn_state(), ChatTurnState::Idle);
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_event_fails_the_turn() {
        let gateway = ScriptedGateway::with_stream(vec![text("Olá")]);
        let (mut controller, _store) = controller_with_history(gateway);

        controller.submit_chat("Oi", |_| {}).await.unwrap();

        let chat = controller.session(Mode::Chat);
        assert_eq!(chat.messages.last().unwrap().text, error_text(STREAM_CLOSED_MESSAGE));
        assert_eq!(chat.error.as_deref(), Some(STREAM_CLOSED_MESSAGE));
        assert!(!chat.loading);
    }

    #[tokio::test]
    async fn completed_turns_extend_the_chat_session() {
        let gateway = Arc::new(ScriptedGateway::default());
        for reply in ["Olá", "Lisboa"] {
            gateway
                .streams
                .lock()
                .unwrap()
                .push_back(vec![text(reply), StreamEventPayload::Done(Vec::new())]);
        }
        let (mut controller, _store) = controller_with_history(gateway.clone());

        controller.submit_chat("Oi", |_| {}).await.unwrap();
        controller.submit_chat("Onde ir?", |_| {}).await.unwrap();

        assert_eq!(*gateway.stream_histories.lock().unwrap(), vec![0, 2]);
        assert_eq!(controller.chat_session().history().len(), 4);
        assert_eq!(controller.chat_session().history()[3].content, "Lisboa");
    }

    #[tokio::test]
    async fn chat_stream_references_are_attached_on_completion() {
        let references = vec![GroundingReference::new("https://visitlisboa.com", "Visit Lisboa")];
        let gateway = ScriptedGateway::with_stream(vec![
            text("Lisboa"),
            StreamEventPayload::Done(references.clone()),
        ]);
        let (mut controller, _store) = controller_with_history(gateway);

        controller.submit_chat("Oi", |_| {}).await.unwrap();

        let reply = controller.session(Mode::Chat).messages.last().unwrap();
        assert_eq!(reply.grounding_references, Some(references));
    }

    #[tokio::test]
    async fn clearing_mid_stream_turns_late_events_into_no_ops() {
        let gateway = ScriptedGateway::with_stream(vec![
            text("Olá"),
            StreamEventPayload::Done(Vec::new()),
        ]);
        let (mut controller, store) = controller_with_history(gateway);

        let worker = controller.start_chat_turn("Oi").unwrap().unwrap();
        worker.await;
        controller.pump_chat_stream().await.unwrap();

        controller.clear_chat_history();
        assert!(controller.session(Mode::Chat).messages.is_empty());
        assert_eq!(store.get_item(CHAT_HISTORY_KEY).unwrap(), None);

        controller.pump_chat_stream().await.unwrap();
        let chat = controller.session(Mode::Chat);
        assert!(chat.messages.is_empty());
        assert!(!chat.loading);
        assert_eq!(chat.error, None);
        assert_eq!(controller.turn_state(), ChatTurnState::Idle);
        assert_eq!(store.get_item(CHAT_HISTORY_KEY).unwrap(), None);
        assert!(controller.chat_session().history().is_empty());
    }

    #[tokio::test]
    async fn stale_events_are_dropped() {
        let gateway = ScriptedGateway::with_stream(vec![StreamEventPayload::Done(Vec::new())]);
        let (mut controller, _store) = controller_with_history(gateway);
        let _worker = controller.start_chat_turn("Oi").unwrap();

        let outcome = controller.apply_stream_event(StreamEventMapped {
            target: StreamTarget::new(999),
            payload: text("from another turn"),
        });

        assert_eq!(outcome, MergeOutcome::Ignored);
        assert_eq!(controller.session(Mode::Chat).messages.last().unwrap().text, "");
        assert!(controller.session(Mode::Chat).loading);
    }

    #[tokio::test]
    async fn history_is_restored_on_startup_and_cleared_on_request() {
        let gateway = ScriptedGateway::with_stream(vec![text("Olá"), StreamEventPayload::Done(Vec::new())]);
        let (mut controller, store) = controller_with_history(gateway.clone());
        controller.submit_chat("Oi", |_| {}).await.unwrap();

        let reloaded = ModeController::new(gateway.clone(), Some(ChatHistory::new(store.clone())));
        assert_eq!(
            reloaded.session(Mode::Chat).messages,
            controller.session(Mode::Chat).messages
        );

        controller.clear_chat_history();
        let reloaded = ModeController::new(gateway, Some(ChatHistory::new(store.clone())));
        assert!(reloaded.session(Mode::Chat).messages.is_empty());
    }

    #[tokio::test]
    async fn search_success_appends_grounded_reply() {
        let references = vec![GroundingReference::new("https://visitporto.travel", "Visit Porto")];
        let gateway = ScriptedGateway::with_answer(Ok(GroundedAnswer {
            text: "Try the Livraria Lello.".to_string(),
            grounding_references: references.clone(),
        }));
        let (mut controller, store) = controller_with_history(gateway);

        controller.submit_search("bookshops in Porto").await.unwrap();

        let search = controller.session(Mode::Search);
        let messages = search.messages.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "bookshops in Porto");
        assert_eq!(messages[1].text, "Try the Livraria Lello.");
        assert_eq!(messages[1].grounding_references, Some(references));
        assert!(!search.loading);
        assert!(controller.session(Mode::Chat).messages.is_empty());
        assert_eq!(store.get_item(CHAT_HISTORY_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn search_failure_appends_error_reply() {
        let gateway = ScriptedGateway::with_answer(Err(upstream_failure()));
        let (mut controller, _store) = controller_with_history(gateway);

        controller.submit_search("museums").await.unwrap();

        let search = controller.session(Mode::Search);
        let reply = search.messages.last().unwrap();
        assert_eq!(reply.sender, Sender::Assistant);
        assert!(reply.text.starts_with("Error: generative API returned status 503"));
        assert!(search.error.as_deref().unwrap().contains("503"));
        assert!(!search.loading);
    }

    #[tokio::test]
    async fn maps_with_pending_location_fails_without_dispatch() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (mut controller, _store) = controller_with_history(gateway.clone());

        controller.submit_maps("coffee nearby").await.unwrap();

        let maps = controller.session(Mode::Maps);
        assert_eq!(maps.messages.len(), 2);
        assert_eq!(maps.messages.last().unwrap().text, error_text(LOCATION_PENDING_MESSAGE));
        assert_eq!(maps.error.as_deref(), Some(LOCATION_PENDING_MESSAGE));
        assert!(!maps.loading);
        assert!(gateway.maps_locations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn maps_sends_resolved_location() {
        let lisbon = Location::new(38.7223, -9.1393);
        let gateway = ScriptedGateway::with_answer(Ok(GroundedAnswer {
            text: "Café A Brasileira".to_string(),
            grounding_references: Vec::new(),
        }));
        let (mut controller, _store) = controller_with_history(gateway.clone());
        controller
            .resolve_location(&crate::location::FixedLocation(lisbon))
            .await;

        controller.submit_maps("coffee nearby").await.unwrap();

        assert_eq!(*gateway.maps_locations.lock().unwrap(), vec![Some(lisbon)]);
        let reply = controller.session(Mode::Maps).messages.last().unwrap();
        assert_eq!(reply.text, "Café A Brasileira");
        assert_eq!(reply.grounding_references, None);
    }

    #[tokio::test]
    async fn maps_after_failed_resolution_sends_without_location() {
        let gateway = ScriptedGateway::with_answer(Ok(GroundedAnswer {
            text: "Several cafés are open late.".to_string(),
            grounding_references: Vec::new(),
        }));
        let (mut controller, _store) = controller_with_history(gateway.clone());
        controller
            .resolve_location(&crate::location::UnavailableLocation)
            .await;

        controller.submit_maps("coffee nearby").await.unwrap();

        assert_eq!(*gateway.maps_locations.lock().unwrap(), vec![None]);
        assert_eq!(controller.session(Mode::Maps).error, None);
    }

    #[tokio::test]
    async fn fast_response_round_trip() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway
            .fast_replies
            .lock()
            .unwrap()
            .push_back(Ok("Yes, bring an adapter.".to_string()));
        gateway
            .fast_replies
            .lock()
            .unwrap()
            .push_back(Err(upstream_failure()));
        let (mut controller, _store) = controller_with_history(gateway);

        controller
            .submit(Mode::FastResponse, "Do I need a plug adapter in the UK?", |_| {})
            .await
            .unwrap();
        controller
            .submit(Mode::FastResponse, "And in Japan?", |_| {})
            .await
            .unwrap();

        let fast = controller.session(Mode::FastResponse);
        let messages = fast.messages.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].text, "Yes, bring an adapter.");
        assert!(messages[3].text.starts_with("Error: "));
        assert!(fast.error.is_some());
    }

    #[tokio::test]
    async fn modes_keep_independent_state() {
        let gateway = ScriptedGateway::with_answer(Err(upstream_failure()));
        let (mut controller, _store) = controller_with_history(gateway);

        controller.submit_search("anything").await.unwrap();

        assert!(controller.session(Mode::Search).error.is_some());
        for mode in [Mode::Chat, Mode::Maps, Mode::FastResponse] {
            let session = controller.session(mode);
            assert!(session.messages.is_empty(), "{mode}");
            assert_eq!(session.error, None, "{mode}");
        }
    }
}
