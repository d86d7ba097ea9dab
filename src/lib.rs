//! spoilerfree is a streaming chat client and relay for talking about movies,
//! series, anime, books and video games without being spoiled.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation state machine, the relay transport, the
//!   incremental UTF-8 stream decoder, and the post-answer classifier.
//! - [`server`] is the relay endpoint that injects the spoiler policy and
//!   forwards conversations to an OpenAI-compatible provider.
//! - [`cli`] parses arguments and runs the interactive chat, the one-shot
//!   `say` command, and the relay server.
//! - [`api`] defines the relay and provider payloads.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod server;
