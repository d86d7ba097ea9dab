use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::ChatMessage;

/// Glyph appended to the in-progress reply while text is still arriving.
/// Display only; it never reaches the endpoint.
pub const STREAMING_CURSOR: char = '▍';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Opaque message identifier, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl MessageId {
    pub fn generate() -> Self {
        let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let mut random = [0_u8; 9];
        if getrandom::fill(&mut random).is_err() {
            random = [0; 9];
        }
        let suffix = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random);
        Self(format!("m{sequence:x}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finalized transcript message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.as_str(), self.content.clone())
    }
}

/// One row of the conversation as the presentation layer sees it.
///
/// `Pending` is the assistant reply still being streamed; the conversation
/// only ever yields it as the final entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    Final(Message),
    Pending(String),
}

impl TranscriptEntry {
    pub fn pending_from_text(accumulated: &str) -> Self {
        let mut display = String::with_capacity(accumulated.len() + STREAMING_CURSOR.len_utf8());
        display.push_str(accumulated);
        display.push(STREAMING_CURSOR);
        TranscriptEntry::Pending(display)
    }

    pub fn role(&self) -> Role {
        match self {
            TranscriptEntry::Final(message) => message.role,
            TranscriptEntry::Pending(_) => Role::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            TranscriptEntry::Final(message) => &message.content,
            TranscriptEntry::Pending(content) => content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TranscriptEntry::Pending(_))
    }
}

/// Converts finalized history into the wire form replayed to the endpoint.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages.iter().map(Message::to_chat_message).collect()
}
