use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::Classifier;
use crate::core::decoder::decode_stream;
use crate::core::inference::Inference;
use crate::core::message::Message;
use crate::core::transport::{RelayEnvelope, Transport, TransportError, TransportReply};

/// Progress reported by a spawned turn task, tagged with its turn id when
/// sent over the channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    Fragment(String),
    Finished,
    Failed(TransportError),
    Classified(Inference),
}

#[derive(Debug)]
pub struct TurnRequest {
    pub envelope: RelayEnvelope,
    pub cancel_token: CancellationToken,
    pub turn_id: u64,
}

#[derive(Debug)]
pub struct ClassifyRequest {
    pub history: Vec<Message>,
    pub answer: String,
    pub danger_mode: bool,
    pub cancel_token: CancellationToken,
    pub turn_id: u64,
}

type EventSender = mpsc::UnboundedSender<(TurnEvent, u64)>;

#[derive(Clone)]
pub struct TurnService {
    tx: EventSender,
}

impl TurnService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(TurnEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, transport: Arc<dyn Transport>, request: TurnRequest) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let TurnRequest {
                envelope,
                cancel_token,
                turn_id,
            } = request;

            tokio::select! {
                _ = relay_turn(transport.as_ref(), &envelope, &cancel_token, &tx, turn_id) => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }

    pub fn spawn_classification(&self, classifier: Arc<dyn Classifier>, request: ClassifyRequest) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ClassifyRequest {
                history,
                answer,
                danger_mode,
                cancel_token,
                turn_id,
            } = request;

            let classify = classifier.classify(history, answer, danger_mode, cancel_token.clone());
            let inference = tokio::select! {
                inference = classify => inference,
                _ = cancel_token.cancelled() => return,
            };
            if cancel_token.is_cancelled() {
                return;
            }
            let _ = tx.send((TurnEvent::Classified(inference), turn_id));
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, event: TurnEvent, turn_id: u64) {
        let _ = self.tx.send((event, turn_id));
    }
}

async fn relay_turn(
    transport: &dyn Transport,
    envelope: &RelayEnvelope,
    cancel_token: &CancellationToken,
    tx: &EventSender,
    turn_id: u64,
) {
    let reply = match transport.call(envelope, cancel_token).await {
        Ok(Some(reply)) => reply,
        Ok(None) | Err(TransportError::Cancelled) => return,
        Err(err) => {
            let _ = tx.send((TurnEvent::Failed(err), turn_id));
            return;
        }
    };

    match reply {
        TransportReply::Stream(bytes) => {
            let mut fragments = std::pin::pin!(decode_stream(bytes));
            while let Some(fragment) = fragments.next().await {
                if cancel_token.is_cancelled() {
                    return;
                }
                match fragment {
                    Ok(text) => {
                        let _ = tx.send((TurnEvent::Fragment(text), turn_id));
                    }
                    Err(err) if err.is_cancelled() => return,
                    Err(err) => {
                        let _ = tx.send((TurnEvent::Failed(err), turn_id));
                        return;
                    }
                }
            }
        }
        TransportReply::Json(body) => {
            if let Some(text) = body.message.filter(|text| !text.is_empty()) {
                let _ = tx.send((TurnEvent::Fragment(text), turn_id));
            }
        }
    }

    if !cancel_token.is_cancelled() {
        let _ = tx.send((TurnEvent::Finished, turn_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatMessage, RelayResponse};
    use crate::core::classifier::tests::CannedTransport;
    use crate::core::transport::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;

    fn request(turn_id: u64) -> TurnRequest {
        TurnRequest {
            envelope: RelayEnvelope::conversation(vec![ChatMessage::user("hi")], true, false),
            cancel_token: CancellationToken::new(),
            turn_id,
        }
    }

    fn ok(bytes: &'static [u8]) -> Result<&'static [u8], TransportError> {
        Ok(bytes)
    }

    fn byte_stream(chunks: Vec<Result<&'static [u8], TransportError>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(Bytes::from_static))
                .collect::<Vec<_>>(),
        ))
    }

    async fn drain(
        rx: &mut mpsc::UnboundedReceiver<(TurnEvent, u64)>,
        until_terminal: bool,
    ) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some((event, _)) = rx.recv().await {
            let terminal = matches!(
                event,
                TurnEvent::Finished | TurnEvent::Failed(_) | TurnEvent::Classified(_)
            );
            events.push(event);
            if until_terminal && terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn stream_reply_emits_fragments_then_finished() {
        let (service, mut rx) = TurnService::new();
        let transport = Arc::new(CannedTransport::new(|| {
            let crab = "🦀".as_bytes();
            let (head, tail): (&'static [u8], &'static [u8]) = (&crab[..1], &crab[1..]);
            Ok(Some(TransportReply::Stream(byte_stream(vec![
                ok(b"I"),
                ok(head),
                ok(tail),
            ]))))
        }));
        service.spawn_stream(transport, request(7));

        let events = drain(&mut rx, true).await;
        assert_eq!(
            events,
            vec![
                TurnEvent::Fragment("I".into()),
                TurnEvent::Fragment("🦀".into()),
                TurnEvent::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn json_reply_is_one_fragment() {
        let (service, mut rx) = TurnService::new();
        let transport = Arc::new(CannedTransport::new(|| {
            Ok(Some(TransportReply::Json(RelayResponse::message("whole"))))
        }));
        service.spawn_stream(transport, request(1));
        let events = drain(&mut rx, true).await;
        assert_eq!(events, vec![TurnEvent::Fragment("whole".into()), TurnEvent::Finished]);
    }

    #[tokio::test]
    async fn malformed_json_reply_finishes_without_fragments() {
        let (service, mut rx) = TurnService::new();
        let transport = Arc::new(CannedTransport::new(|| {
            Ok(Some(TransportReply::Json(RelayResponse::default())))
        }));
        service.spawn_stream(transport, request(1));
        assert_eq!(drain(&mut rx, true).await, vec![TurnEvent::Finished]);
    }

    #[tokio::test]
    async fn mid_stream_failure_is_reported_once() {
        let (service, mut rx) = TurnService::new();
        let transport = Arc::new(CannedTransport::new(|| {
            Ok(Some(TransportReply::Stream(byte_stream(vec![
                ok(b"partial"),
                Err(TransportError::Network("reset".into())),
                ok(b"never"),
            ]))))
        }));
        service.spawn_stream(transport, request(3));
        let events = drain(&mut rx, true).await;
        assert_eq!(
            events,
            vec![
                TurnEvent::Fragment("partial".into()),
                TurnEvent::Failed(TransportError::Network("reset".into())),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_turn_emits_nothing() {
        let (service, mut rx) = TurnService::new();
        let transport = Arc::new(CannedTransport::new(|| {
            Ok(Some(TransportReply::Stream(byte_stream(vec![ok(b"foo")]))))
        }));
        let request = request(2);
        request.cancel_token.cancel();
        service.spawn_stream(transport, request);
        drop(service);
        assert!(drain(&mut rx, false).await.is_empty());
    }

    struct ScriptedClassifier(Inference);

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(
            &self,
            _history: Vec<Message>,
            _answer: String,
            _danger_mode: bool,
            _cancel: CancellationToken,
        ) -> Inference {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn classification_result_is_tagged_with_turn() {
        let (service, mut rx) = TurnService::new();
        service.spawn_classification(
            Arc::new(ScriptedClassifier(Inference::unknown())),
            ClassifyRequest {
                history: vec![Message::user("q")],
                answer: "a".into(),
                danger_mode: false,
                cancel_token: CancellationToken::new(),
                turn_id: 11,
            },
        );
        let (event, turn_id) = rx.recv().await.expect("event");
        assert_eq!(turn_id, 11);
        assert_eq!(event, TurnEvent::Classified(Inference::unknown()));
    }
}
