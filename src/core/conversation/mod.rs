//! The conversation state machine.
//!
//! `Conversation` owns the transcript, the in-progress reply, and the
//! loading/streaming flags. It never performs I/O: user intents and turn
//! events go in, and commands describing the work to start come out. The
//! driver executes those commands and feeds the resulting [`TurnEvent`]s
//! back, each tagged with the turn id it belongs to. Events from any turn
//! other than the current one are dropped, so a superseded stream can never
//! touch the transcript.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::inference::Inference;
use crate::core::message::{to_chat_messages, Message, TranscriptEntry};
use crate::core::transport::{RelayEnvelope, TransportError};
use crate::core::turn::{ClassifyRequest, TurnEvent, TurnRequest};


/// Where the current turn stands.
///
/// Finalizing the answer and recovering from an error both complete inside a
/// single event and are recorded in [`TurnOutcome`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    Streaming,
    ClassifyPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream finished with text and an assistant message was added.
    Answered,
    /// The stream finished without any text; nothing was added.
    Empty,
    /// A transport failure was turned into an assistant message.
    ErrorRecovered,
    /// The turn was cancelled by a newer submission or a reset.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSettings {
    pub stream: bool,
    pub danger_mode: bool,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            stream: true,
            danger_mode: false,
        }
    }
}

pub enum ConversationCommand {
    SpawnStream(TurnRequest),
    SpawnClassification(ClassifyRequest),
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub messages: Vec<TranscriptEntry>,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub inference: Option<Inference>,
    pub phase: Phase,
}

impl ConversationView {
    pub fn pending(&self) -> Option<&str> {
        match self.messages.last() {
            Some(TranscriptEntry::Pending(content)) => Some(content.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pending: Option<String>,
    inference: Option<Inference>,
    phase: Phase,
    is_loading: bool,
    is_streaming: bool,
    current_turn_id: u64,
    cancel_token: Option<CancellationToken>,
    submitted_history: Vec<Message>,
    last_outcome: Option<TurnOutcome>,
    settings: ConversationSettings,
}

impl Conversation {
    pub fn new(settings: ConversationSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> ConversationSettings {
        self.settings
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn inference(&self) -> Option<&Inference> {
        self.inference.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        self.last_outcome
    }

    pub fn current_turn_id(&self) -> u64 {
        self.current_turn_id
    }

    pub fn is_current_turn(&self, turn_id: u64) -> bool {
        self.current_turn_id == turn_id && self.cancel_token.is_some()
    }

    pub fn view(&self) -> ConversationView {
        let mut messages: Vec<TranscriptEntry> = self
            .messages
            .iter()
            .cloned()
            .map(TranscriptEntry::Final)
            .collect();
        if let Some(text) = &self.pending {
            messages.push(TranscriptEntry::pending_from_text(text));
        }

        ConversationView {
            messages,
            is_loading: self.is_loading,
            is_streaming: self.is_streaming,
            inference: self.inference.clone(),
            phase: self.phase,
        }
    }

    /// Starts a turn for `text`. Returns `None` when the text is blank or a
    /// turn is already in flight; such submissions are dropped, not queued.
    pub fn submit(&mut self, text: &str) -> Option<ConversationCommand> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.is_loading {
            debug!("Dropping submission while a turn is in flight");
            return None;
        }

        let (cancel_token, turn_id) = self.start_new_turn();
        self.messages.push(Message::user(text));
        self.is_loading = true;
        self.phase = Phase::Sending;
        self.submitted_history = self.messages.clone();

        debug!(turn_id, history = self.messages.len(), "Turn submitted");

        let envelope = RelayEnvelope::conversation(
            to_chat_messages(&self.messages),
            self.settings.stream,
            self.settings.danger_mode,
        );
        Some(ConversationCommand::SpawnStream(TurnRequest {
            envelope,
            cancel_token,
            turn_id,
        }))
    }

    /// Applies one event from a spawned task. Returns the follow-up command,
    /// if the event completes a stage that needs one.
    pub fn handle_event(
        &mut self,
        event: TurnEvent,
        turn_id: u64,
    ) -> Option<ConversationCommand> {
        if !self.is_current_turn(turn_id) {
            debug!(
                turn_id,
                current = self.current_turn_id,
                "Ignoring event from stale turn"
            );
            return None;
        }

        match (self.phase, event) {
            (Phase::Sending | Phase::Streaming, TurnEvent::Fragment(text)) => {
                self.append_fragment(&text);
                None
            }
            (Phase::Sending | Phase::Streaming, TurnEvent::Finished) => {
                self.finalize_stream()
            }
            (Phase::Sending | Phase::Streaming, TurnEvent::Failed(err)) => {
                self.recover_from_error(err);
                None
            }
            (Phase::ClassifyPending, TurnEvent::Classified(inference)) => {
                self.apply_classification(inference);
                None
            }
            (phase, event) => {
                debug!(
                    ?phase,
                    ?event,
                    "Ignoring event that does not fit the current phase"
                );
                None
            }
        }
    }

    /// Abandons any in-flight work and clears the transcript.
    pub fn reset(&mut self) {
        self.cancel_current_turn();
        self.messages.clear();
        self.inference = None;
        self.last_outcome = None;
        self.phase = Phase::Idle;
    }

    /// Cancels the in-flight turn, if any. A partially streamed reply is
    /// discarded, never promoted.
    pub fn cancel_current_turn(&mut self) {
        let Some(token) = self.cancel_token.take() else {
            return;
        };
        token.cancel();
        if self.is_loading {
            debug!(turn_id = self.current_turn_id, "Turn cancelled");
            self.last_outcome = Some(TurnOutcome::Cancelled);
        }
        self.pending = None;
        self.submitted_history.clear();
        self.is_streaming = false;
        self.is_loading = false;
        self.phase = Phase::Idle;
    }

    fn start_new_turn(&mut self) -> (CancellationToken, u64) {
        self.cancel_current_turn();
        self.current_turn_id += 1;

        let token = CancellationToken::new();
        self.cancel_token = Some(token.clone());
        (token, self.current_turn_id)
    }

    fn append_fragment(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.phase == Phase::Sending {
            debug!(turn_id = self.current_turn_id, "First fragment received");
        }
        self.phase = Phase::Streaming;
        self.is_streaming = true;
        self.pending.get_or_insert_with(String::new).push_str(text);
    }

    fn finalize_stream(&mut self) -> Option<ConversationCommand> {
        let answer = self.pending.take().unwrap_or_default();
        self.is_streaming = false;

        if answer.is_empty() {
            self.last_outcome = Some(TurnOutcome::Empty);
        } else {
            self.messages.push(Message::assistant(answer.clone()));
            self.last_outcome = Some(TurnOutcome::Answered);
        }

        self.phase = Phase::ClassifyPending;
        debug!(
            turn_id = self.current_turn_id,
            chars = answer.chars().count(),
            "Answer finalized"
        );

        let cancel_token = self.cancel_token.clone().unwrap_or_default();
        Some(ConversationCommand::SpawnClassification(ClassifyRequest {
            history: std::mem::take(&mut self.submitted_history),
            answer,
            danger_mode: self.settings.danger_mode,
            cancel_token,
            turn_id: self.current_turn_id,
        }))
    }

    fn recover_from_error(&mut self, err: TransportError) {
        if err.is_cancelled() {
            self.cancel_current_turn();
            return;
        }

        tracing::warn!(turn_id = self.current_turn_id, "Turn failed: {err}");
        self.pending = None;
        self.messages.push(Message::assistant(err.user_message()));
        self.last_outcome = Some(TurnOutcome::ErrorRecovered);
        self.settle();
    }

    fn apply_classification(&mut self, inference: Inference) {
        debug!(
            media_type = %inference.media_type,
            title = %inference.title,
            position = %inference.position,
            "Classification applied"
        );
        self.inference = Some(inference);
        self.settle();
    }

    fn settle(&mut self) {
        self.cancel_token = None;
        self.submitted_history.clear();
        self.is_streaming = false;
        self.is_loading = false;
        self.phase = Phase::Idle;
    }

    #[cfg(test)]
    pub(crate) fn release_loading_guard_for_test(&mut self) {
        self.is_loading = false;
    }

    #[cfg(test)]
    pub(crate) fn set_inference_for_test(&mut self, inference: Inference) {
        self.inference = Some(inference);
    }
}
