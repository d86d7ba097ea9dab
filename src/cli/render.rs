//! Line-oriented transcript printing.
//!
//! A terminal without a full-screen UI cannot rewrite the placeholder in
//! place, so the printer writes only what is new in each view: the unseen
//! suffix of the streaming text, then the rest of the final message once it
//! lands.

use std::io::{self, Write};

use crate::core::conversation::ConversationView;
use crate::core::inference::{Inference, MediaType};
use crate::core::message::{Role, TranscriptEntry, STREAMING_CURSOR};

const ASSISTANT_PREFIX: &str = "» ";

pub struct TranscriptPrinter<W: Write> {
    out: W,
    printed_messages: usize,
    streamed: String,
    last_inference: Option<Inference>,
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed_messages: 0,
            streamed: String::new(),
            last_inference: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Forgets everything printed so far, for a fresh conversation.
    pub fn reset(&mut self) {
        self.printed_messages = 0;
        self.streamed.clear();
        self.last_inference = None;
    }

    pub fn render(&mut self, view: &ConversationView) -> io::Result<()> {
        for entry in &view.messages {
            if let TranscriptEntry::Pending(display) = entry {
                let text = display.strip_suffix(STREAMING_CURSOR).unwrap_or(display);
                self.write_streamed(text)?;
            }
        }

        let finals: Vec<&TranscriptEntry> = view
            .messages
            .iter()
            .filter(|entry| !entry.is_pending())
            .collect();
        if finals.len() < self.printed_messages {
            // The transcript shrank, so it was reset elsewhere.
            self.printed_messages = 0;
        }
        for entry in &finals[self.printed_messages..] {
            if entry.role() == Role::Assistant {
                self.write_final(entry.content())?;
            }
        }
        self.printed_messages = finals.len();

        if !view.is_loading && view.inference != self.last_inference {
            if let Some(inference) = &view.inference {
                writeln!(self.out, "{}", describe_inference(inference))?;
            }
            self.last_inference = view.inference.clone();
        }

        self.out.flush()
    }

    fn write_streamed(&mut self, text: &str) -> io::Result<()> {
        match text.strip_prefix(self.streamed.as_str()) {
            Some(unseen) if !self.streamed.is_empty() => write!(self.out, "{unseen}")?,
            _ => {
                // Either the first fragment or a different reply altogether.
                if !self.streamed.is_empty() {
                    writeln!(self.out)?;
                }
                write!(self.out, "{ASSISTANT_PREFIX}{text}")?;
            }
        }
        self.streamed = text.to_string();
        Ok(())
    }

    fn write_final(&mut self, content: &str) -> io::Result<()> {
        let streamed = std::mem::take(&mut self.streamed);
        if streamed.is_empty() {
            writeln!(self.out, "{ASSISTANT_PREFIX}{content}")
        } else if let Some(rest) = content.strip_prefix(streamed.as_str()) {
            writeln!(self.out, "{rest}")
        } else {
            writeln!(self.out)?;
            writeln!(self.out, "{ASSISTANT_PREFIX}{content}")
        }
    }
}

/// One-line summary of what the conversation appears to be about.
pub fn describe_inference(inference: &Inference) -> String {
    if inference.is_unknown() {
        return "  (context: not sure yet)".to_string();
    }

    let mut parts = Vec::new();
    if inference.media_type != MediaType::Unknown {
        parts.push(inference.media_type.to_string());
    }
    if !inference.title.is_empty() {
        parts.push(format!("\"{}\"", inference.title));
    }
    if !inference.position.is_empty() {
        parts.push(inference.position.clone());
    }
    format!("  (context: {})", parts.join(", "))
}
