use std::error::Error;
use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use super::prompts::{classification_messages, conversation_messages};
use super::upstream::UpstreamError;
use super::RelayState;
use crate::api::{RelayRequest, RelayResponse};
use crate::core::inference::Inference;

#[derive(Debug)]
pub enum RelayError {
    /// The relay cannot call the provider as configured.
    Configuration(String),
    Upstream(UpstreamError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Configuration(msg) => write!(f, "relay misconfigured: {msg}"),
            RelayError::Upstream(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RelayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RelayError::Configuration(_) => None,
            RelayError::Upstream(err) => Some(err),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(err: UpstreamError) -> Self {
        RelayError::Upstream(err)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::Configuration(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            RelayError::Upstream(err) => (StatusCode::BAD_GATEWAY, err.summary()),
        };

        tracing::error!("Relay error: {} - {}", status, self);

        (status, Json(RelayResponse::error(message))).into_response()
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn chat(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<RelayRequest>,
) -> Result<Response, RelayError> {
    let upstream = state.upstream().ok_or_else(|| {
        RelayError::Configuration(
            "No API key configured. Set SPOILERFREE_API_KEY or OPENAI_API_KEY.".to_string(),
        )
    })?;

    info!(
        messages = request.messages.len(),
        stream = request.stream,
        infer_only = request.infer_only,
        danger_mode = request.danger_mode,
        "Relay request"
    );

    if request.infer_only {
        let messages = classification_messages(
            &request.messages,
            &request.last_answer,
            request.danger_mode,
        );
        let raw = upstream.complete(messages).await?;
        let inference = Inference::from_model_output(&raw);
        if inference.is_unknown() {
            warn!("Classification output was not usable");
        }
        return Ok(Json(RelayResponse::inference(inference)).into_response());
    }

    let messages = conversation_messages(&request.messages, request.danger_mode);

    if request.stream {
        let rx = upstream.stream(messages).await?;
        let body = Body::from_stream(UnboundedReceiverStream::new(rx));
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response());
    }

    let text = upstream.complete(messages).await?;
    Ok(Json(RelayResponse::message(text)).into_response())
}
