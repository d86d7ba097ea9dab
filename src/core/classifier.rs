//! Best-effort classification of the media a conversation concerns.
//!
//! Runs after an answer is finalized. Failures never reach the conversation:
//! every path resolves to an [`Inference`], falling back to
//! [`Inference::unknown`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::inference::Inference;
use crate::core::message::{to_chat_messages, Message};
use crate::core::transport::{RelayEnvelope, Transport, TransportReply};

pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait Classifier: Send + Sync {
    /// `history` is a snapshot taken at submission time and excludes the
    /// answer being classified. `danger_mode` is the flag the answer was
    /// requested with.
    async fn classify(
        &self,
        history: Vec<Message>,
        answer: String,
        danger_mode: bool,
        cancel: CancellationToken,
    ) -> Inference;
}

/// Classifies through the relay endpoint's classification-only mode.
pub struct RelayClassifier {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RelayClassifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_CLASSIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Classifier for RelayClassifier {
    async fn classify(
        &self,
        history: Vec<Message>,
        answer: String,
        danger_mode: bool,
        cancel: CancellationToken,
    ) -> Inference {
        let envelope =
            RelayEnvelope::classification(to_chat_messages(&history), answer, danger_mode);

        match timeout(self.timeout, self.transport.call(&envelope, &cancel)).await {
            Ok(Ok(Some(TransportReply::Json(body)))) => match body.inference {
                Some(inference) => inference,
                None => {
                    tracing::warn!("Classification reply carried no inference");
                    Inference::unknown()
                }
            },
            Ok(Ok(Some(TransportReply::Stream(_)))) => {
                tracing::warn!("Classification reply was a stream; ignoring");
                Inference::unknown()
            }
            Ok(Ok(None)) => Inference::unknown(),
            Ok(Err(err)) => {
                if !err.is_cancelled() {
                    tracing::warn!("Classification request failed: {err}");
                }
                Inference::unknown()
            }
            Err(_) => {
                tracing::warn!("Classification timed out");
                Inference::unknown()
            }
        }
    }
}
