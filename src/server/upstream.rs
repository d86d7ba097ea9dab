//! Client for the OpenAI-compatible chat-completions provider behind the
//! relay.

use std::error::Error;
use std::fmt;

use bytes::Bytes;
use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, ChatResponse, CompletionResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The request never produced a response.
    Request(String),
    /// The provider answered with a non-success status.
    Status { status: u16, summary: String },
    /// The provider reported an error inside the event stream.
    Stream(String),
    /// A non-streaming reply could not be read.
    Malformed(String),
}

impl UpstreamError {
    /// Short text suitable for showing to the end user.
    pub fn summary(&self) -> String {
        match self {
            UpstreamError::Request(_) => {
                "The language model provider could not be reached.".to_string()
            }
            UpstreamError::Status { summary, .. } => summary.clone(),
            UpstreamError::Stream(summary) => summary.clone(),
            UpstreamError::Malformed(_) => {
                "The language model provider sent an unreadable reply.".to_string()
            }
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Request(err) => write!(f, "provider request failed: {err}"),
            UpstreamError::Status { status, summary } => {
                write!(f, "provider returned {status}: {summary}")
            }
            UpstreamError::Stream(summary) => write!(f, "provider stream error: {summary}"),
            UpstreamError::Malformed(err) => write!(f, "malformed provider reply: {err}"),
        }
    }
}

impl Error for UpstreamError {}

/// Items yielded while relaying a streamed completion.
pub type DeltaResult = Result<Bytes, UpstreamError>;

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl UpstreamClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        stream: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream,
        };
        let url = construct_api_url(&self.base_url, "chat/completions");
        debug!(%url, model = %self.model, stream, "Calling provider");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| UpstreamError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                summary: summarize_error(&error_text, status.as_u16()),
            });
        }
        Ok(response)
    }

    /// Runs a non-streaming completion and returns the reply text.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError> {
        let response = self.send(messages, false).await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|err| UpstreamError::Malformed(err.to_string()))?;
        Ok(body.first_content().unwrap_or_default().to_string())
    }

    /// Starts a streamed completion. Status errors are returned before any
    /// text; later failures arrive as the last item on the channel. The
    /// channel closes when the provider is done or the receiver is dropped.
    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::UnboundedReceiver<DeltaResult>, UpstreamError> {
        let response = self.send(messages, true).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_sse(response, tx));
        Ok(rx)
    }
}

async fn pump_sse(response: reqwest::Response, tx: mpsc::UnboundedSender<DeltaResult>) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(Err(UpstreamError::Request(err.to_string())));
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let event = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(line) => extract_data_payload(line.trim()).map(parse_sse_payload),
                Err(err) => {
                    debug!("Skipping non UTF-8 line in provider stream: {err}");
                    None
                }
            };
            buffer.drain(..=newline_pos);

            match event {
                Some(SseEvent::Delta(text)) => {
                    if tx.send(Ok(Bytes::from(text))).is_err() {
                        debug!("Relay client went away; abandoning provider stream");
                        return;
                    }
                }
                Some(SseEvent::Done) => return,
                Some(SseEvent::Error(summary)) => {
                    let _ = tx.send(Err(UpstreamError::Stream(summary)));
                    return;
                }
                Some(SseEvent::Empty) | None => {}
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Empty,
    Done,
    Error(String),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_sse_payload(payload: &str) -> SseEvent {
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    if payload.trim().is_empty() {
        return SseEvent::Empty;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(SseEvent::Empty, SseEvent::Delta),
        Err(_) => SseEvent::Error(summarize_error(payload, 0)),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Reduces a provider error body to one line of text.
fn summarize_error(error_text: &str, status: u16) -> String {
    const MAX_RAW_CHARS: usize = 300;

    let trimmed = error_text.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            return summary;
        }
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.starts_with('<') {
        return match status {
            0 => "The language model provider reported an error.".to_string(),
            code => format!("The language model provider returned status {code}."),
        };
    }
    if collapsed.chars().count() > MAX_RAW_CHARS {
        let truncated: String = collapsed.chars().take(MAX_RAW_CHARS).collect();
        return format!("{truncated}…");
    }
    collapsed
}

fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}
