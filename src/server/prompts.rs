//! Instructions the relay places in front of every provider call.

use crate::api::ChatMessage;

pub const SPOILER_FREE_PROMPT: &str = "You are a spoiler-free companion for movies, series, anime, \
books and video games. Work out which work the user is talking about and how far into it they \
are, then answer only with information up to that point. Never reveal later plot events, twists, \
deaths, identities or endings, not even as hints. If you cannot tell how far the user has got, \
ask before answering. When a question can only be answered with spoilers, say so and offer a \
spoiler-free alternative.";

pub const DANGER_MODE_PROMPT: &str = "You are a knowledgeable companion for movies, series, \
anime, books and video games. The user has turned off spoiler protection: answer fully and \
directly, including later plot events, twists and endings.";

pub const CLASSIFY_PROMPT: &str = "Classify the conversation below. Reply with a single JSON \
object and nothing else, using exactly these keys: \"mediaType\" (one of \"movie\", \"series\", \
\"anime\", \"book\", \"videogame\", \"unknown\"), \"title\" (the work's title, or \"\" if \
unsure) and \"position\" (how far into the work the user is, such as an episode, chapter or \
level, or \"\" if unsure).";

pub fn policy_prompt(danger_mode: bool) -> &'static str {
    if danger_mode {
        DANGER_MODE_PROMPT
    } else {
        SPOILER_FREE_PROMPT
    }
}

/// Prepends the policy prompt to the client's history. System messages sent
/// by the client are dropped so the policy cannot be overridden.
pub fn conversation_messages(history: &[ChatMessage], danger_mode: bool) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(policy_prompt(danger_mode)));
    messages.extend(
        history
            .iter()
            .filter(|message| message.role != "system")
            .cloned(),
    );
    messages
}

/// Builds the classification request: policy prompt, classification
/// instructions, then the transcript and latest answer as one user message.
pub fn classification_messages(
    history: &[ChatMessage],
    last_answer: &str,
    danger_mode: bool,
) -> Vec<ChatMessage> {
    let mut transcript = String::from("Conversation:\n");
    for message in history.iter().filter(|message| message.role != "system") {
        transcript.push_str(&message.role);
        transcript.push_str(": ");
        transcript.push_str(message.content.trim());
        transcript.push('\n');
    }
    transcript.push_str("\nLatest answer:\n");
    transcript.push_str(last_answer.trim());

    vec![
        ChatMessage::system(policy_prompt(danger_mode)),
        ChatMessage::system(CLASSIFY_PROMPT),
        ChatMessage::user(transcript),
    ]
}
