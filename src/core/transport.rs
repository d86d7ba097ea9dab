//! HTTP client for the relay endpoint.

use std::error::Error;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatMessage, RelayRequest, RelayResponse};

/// Shown when a failure carries no server-provided explanation.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong while contacting the assistant. Please try again.";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// One call's worth of request data. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEnvelope {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub infer_only: bool,
    pub danger_mode: bool,
    pub last_answer: Option<String>,
}

impl RelayEnvelope {
    pub fn conversation(messages: Vec<ChatMessage>, stream: bool, danger_mode: bool) -> Self {
        Self {
            messages,
            stream,
            infer_only: false,
            danger_mode,
            last_answer: None,
        }
    }

    pub fn classification(
        messages: Vec<ChatMessage>,
        last_answer: impl Into<String>,
        danger_mode: bool,
    ) -> Self {
        Self {
            messages,
            stream: false,
            infer_only: true,
            danger_mode,
            last_answer: Some(last_answer.into()),
        }
    }

    pub fn to_request(&self) -> RelayRequest {
        RelayRequest {
            messages: self.messages.clone(),
            stream: self.stream,
            infer_only: self.infer_only,
            danger_mode: self.danger_mode,
            last_answer: self.last_answer.clone().unwrap_or_default(),
        }
    }
}

pub enum TransportReply {
    Stream(ByteStream),
    Json(RelayResponse),
}

impl fmt::Debug for TransportReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportReply::Stream(_) => f.write_str("TransportReply::Stream(..)"),
            TransportReply::Json(body) => {
                f.debug_tuple("TransportReply::Json").field(body).finish()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call's token was cancelled while the request was in flight.
    Cancelled,
    /// The endpoint answered with a non-success status.
    Status {
        status: u16,
        server_text: Option<String>,
    },
    /// No response was received at all.
    Network(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// Text suitable for showing in the transcript.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Status {
                server_text: Some(text),
                ..
            } if !text.trim().is_empty() => text.trim().to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Cancelled => write!(f, "Request cancelled"),
            TransportError::Status {
                status,
                server_text: Some(text),
            } => write!(f, "Relay returned {status}: {text}"),
            TransportError::Status {
                status,
                server_text: None,
            } => write!(f, "Relay returned {status}"),
            TransportError::Network(detail) => write!(f, "Network error: {detail}"),
        }
    }
}

impl Error for TransportError {}

/// The seam between the conversation and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues one call. Returns `Ok(None)` without touching the network when
    /// `cancel` is already cancelled.
    async fn call(
        &self,
        envelope: &RelayEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Option<TransportReply>, TransportError>;
}

#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RelayClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn send(&self, envelope: &RelayEnvelope) -> Result<TransportReply, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&envelope.to_request())
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                server_text: extract_server_text(&body),
            });
        }

        if envelope.stream {
            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| TransportError::Network(err.to_string())));
            return Ok(TransportReply::Stream(Box::pin(bytes)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(TransportReply::Json(parse_relay_response(&body)))
    }
}

#[async_trait]
impl Transport for RelayClient {
    async fn call(
        &self,
        envelope: &RelayEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Option<TransportReply>, TransportError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        debug!(
            endpoint = %self.endpoint,
            messages = envelope.messages.len(),
            stream = envelope.stream,
            infer_only = envelope.infer_only,
            "Calling relay"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.send(envelope) => result.map(Some),
        }
    }
}

/// Unexpected shapes are treated as an empty reply.
fn parse_relay_response(body: &[u8]) -> RelayResponse {
    serde_json::from_slice(body).unwrap_or_else(|err| {
        debug!(error = %err, "Ignoring malformed relay response");
        RelayResponse::default()
    })
}

fn extract_server_text(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .get("error")
            .and_then(|error| match error {
                serde_json::Value::String(text) => Some(text.clone()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
            .filter(|text| !text.trim().is_empty()),
        Err(_) => Some(trimmed.to_string()),
    }
}
