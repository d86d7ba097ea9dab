//! Runs a [`Conversation`] against real asynchronous work.
//!
//! The driver executes the commands the conversation emits, then feeds the
//! resulting turn events back into it in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::classifier::Classifier;
use crate::core::conversation::{Conversation, ConversationCommand, ConversationView};
use crate::core::transport::Transport;
use crate::core::turn::{TurnEvent, TurnService};

pub struct ConversationDriver {
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn Classifier>,
    service: TurnService,
    rx: mpsc::UnboundedReceiver<(TurnEvent, u64)>,
}

impl ConversationDriver {
    pub fn new(
        conversation: Conversation,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let (service, rx) = TurnService::new();
        Self {
            conversation,
            transport,
            classifier,
            service,
            rx,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn view(&self) -> ConversationView {
        self.conversation.view()
    }

    /// Returns whether a turn was started.
    pub fn submit(&mut self, text: &str) -> bool {
        match self.conversation.submit(text) {
            Some(command) => {
                self.dispatch(command);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    fn dispatch(&self, command: ConversationCommand) {
        match command {
            ConversationCommand::SpawnStream(request) => {
                self.service.spawn_stream(Arc::clone(&self.transport), request)
            }
            ConversationCommand::SpawnClassification(request) => self
                .service
                .spawn_classification(Arc::clone(&self.classifier), request),
        }
    }

    fn apply(&mut self, event: TurnEvent, turn_id: u64) {
        if let Some(command) = self.conversation.handle_event(event, turn_id) {
            self.dispatch(command);
        }
    }

    /// Applies every event already waiting without blocking. Returns whether
    /// anything was received.
    pub fn process_pending(&mut self) -> bool {
        let mut received_any = false;
        while let Ok((event, turn_id)) = self.rx.try_recv() {
            self.apply(event, turn_id);
            received_any = true;
        }
        received_any
    }

    /// Waits for the next event and returns the updated view, or `None` once
    /// the conversation is idle.
    pub async fn next_update(&mut self) -> Option<ConversationView> {
        if !self.conversation.is_loading() {
            return None;
        }
        let (event, turn_id) = self.rx.recv().await?;
        self.apply(event, turn_id);
        Some(self.conversation.view())
    }

    /// Drives the current turn to completion, handing every intermediate
    /// view to `on_update`.
    pub async fn run_until_idle<F>(&mut self, mut on_update: F)
    where
        F: FnMut(&ConversationView),
    {
        while let Some(view) = self.next_update().await {
            on_update(&view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RelayResponse;
    use crate::core::classifier::tests::CannedTransport;
    use crate::core::classifier::RelayClassifier;
    use crate::core::conversation::{ConversationSettings, Phase, TurnOutcome};
    use crate::core::inference::{Inference, MediaType};
    use crate::core::message::{Role, STREAMING_CURSOR};
    use crate::core::transport::{ByteStream, TransportError, TransportReply};
    use bytes::Bytes;
    use futures_util::stream;

    fn stream_reply(chunks: &[&'static str]) -> TransportReply {
        let items: Vec<Result<Bytes, TransportError>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        let bytes: ByteStream = Box::pin(stream::iter(items));
        TransportReply::Stream(bytes)
    }

    fn driver_with(
        conversation: CannedTransport,
        classification: CannedTransport,
    ) -> ConversationDriver {
        let classifier = RelayClassifier::new(Arc::new(classification));
        ConversationDriver::new(
            Conversation::new(ConversationSettings::default()),
            Arc::new(conversation),
            Arc::new(classifier),
        )
    }

    fn book_classifier() -> CannedTransport {
        CannedTransport::new(|| {
            Ok(Some(TransportReply::Json(RelayResponse::inference(
                Inference::new(MediaType::Book, "", "early"),
            ))))
        })
    }

    #[tokio::test]
    async fn runs_a_streamed_turn_through_classification() {
        let mut driver = driver_with(
            CannedTransport::new(|| Ok(Some(stream_reply(&["I", "t's early", " days."])))),
            book_classifier(),
        );
        assert!(driver.submit("What happened in chapter 3?"));

        let mut pending_seen = Vec::new();
        let mut phases = Vec::new();
        driver
            .run_until_idle(|view| {
                if let Some(pending) = view.pending() {
                    pending_seen.push(pending.to_string());
                }
                phases.push(view.phase);
            })
            .await;

        assert_eq!(
            pending_seen,
            vec![
                format!("I{STREAMING_CURSOR}"),
                format!("It's early{STREAMING_CURSOR}"),
                format!("It's early days.{STREAMING_CURSOR}"),
            ]
        );
        assert!(phases.contains(&Phase::ClassifyPending));
        assert_eq!(phases.last(), Some(&Phase::Idle));

        let view = driver.view();
        assert!(!view.is_loading);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].role(), Role::Assistant);
        assert_eq!(view.messages[1].content(), "It's early days.");
        assert_eq!(
            view.inference,
            Some(Inference::new(MediaType::Book, "", "early"))
        );
    }

    #[tokio::test]
    async fn failed_turn_settles_with_error_message_and_skips_classification() {
        let classification = Arc::new(book_classifier());
        let mut driver = ConversationDriver::new(
            Conversation::default(),
            Arc::new(CannedTransport::new(|| {
                Err(TransportError::Status {
                    status: 502,
                    server_text: Some("Provider unavailable".into()),
                })
            })),
            Arc::new(RelayClassifier::new(classification.clone())),
        );
        assert!(driver.submit("hello"));
        driver.run_until_idle(|_| {}).await;

        let view = driver.view();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].content(), "Provider unavailable");
        assert!(view.inference.is_none());
        assert!(classification.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn non_streaming_reply_lands_as_one_message() {
        let mut driver = ConversationDriver::new(
            Conversation::new(ConversationSettings {
                stream: false,
                danger_mode: false,
            }),
            Arc::new(CannedTransport::new(|| {
                Ok(Some(TransportReply::Json(RelayResponse::message("Whole answer"))))
            })),
            Arc::new(RelayClassifier::new(Arc::new(book_classifier()))),
        );
        assert!(driver.submit("hello"));
        driver.run_until_idle(|_| {}).await;

        let view = driver.view();
        assert_eq!(view.messages[1].content(), "Whole answer");
        assert!(view.inference.is_some());
    }

    #[tokio::test]
    async fn classification_sees_history_without_the_answer() {
        let classification = Arc::new(book_classifier());
        let mut driver = ConversationDriver::new(
            Conversation::default(),
            Arc::new(CannedTransport::new(|| Ok(Some(stream_reply(&["answer"]))))),
            Arc::new(RelayClassifier::new(classification.clone())),
        );
        assert!(driver.submit("question"));
        driver.run_until_idle(|_| {}).await;

        let seen = classification.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].infer_only);
        assert_eq!(seen[0].messages.len(), 1);
        assert_eq!(seen[0].messages[0].content, "question");
        assert_eq!(seen[0].last_answer.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn submit_is_refused_while_loading() {
        let mut driver = driver_with(
            CannedTransport::new(|| Ok(Some(stream_reply(&["a"])))),
            book_classifier(),
        );
        assert!(driver.submit("first"));
        assert!(!driver.submit("second"));
        driver.run_until_idle(|_| {}).await;
        assert!(driver.submit("second"));
    }

    #[tokio::test]
    async fn next_update_is_none_when_idle() {
        let mut driver = driver_with(CannedTransport::new(|| Ok(None)), book_classifier());
        assert!(driver.next_update().await.is_none());
        assert!(!driver.process_pending());
    }

    #[tokio::test]
    async fn failing_classifier_still_keeps_the_answer() {
        let mut driver = driver_with(
            CannedTransport::new(|| Ok(Some(stream_reply(&["a", "b"])))),
            CannedTransport::new(|| Err(TransportError::Network("refused".into()))),
        );
        let earlier = Inference::new(MediaType::Movie, "Alien", "act 1");
        driver.conversation.set_inference_for_test(earlier);
        assert!(driver.submit("question"));
        driver.run_until_idle(|_| {}).await;

        let view = driver.view();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].content(), "ab");
        assert_eq!(view.inference, Some(Inference::unknown()));
        assert!(!view.is_loading);
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(
            driver.conversation().last_outcome(),
            Some(TurnOutcome::Answered)
        );
    }

    #[tokio::test]
    async fn danger_mode_reaches_both_requests_of_a_turn() {
        let conversation = Arc::new(CannedTransport::new(|| Ok(Some(stream_reply(&["a"])))));
        let classification = Arc::new(book_classifier());
        let mut driver = ConversationDriver::new(
            Conversation::new(ConversationSettings {
                stream: true,
                danger_mode: true,
            }),
            conversation.clone(),
            Arc::new(RelayClassifier::new(classification.clone())),
        );
        assert!(driver.submit("Who dies?"));
        driver.run_until_idle(|_| {}).await;

        let streamed = conversation.seen.lock().expect("lock");
        let classified = classification.seen.lock().expect("lock");
        assert_eq!(streamed.len(), 1);
        assert_eq!(classified.len(), 1);
        assert!(streamed[0].danger_mode);
        assert!(classified[0].danger_mode);
    }
}
