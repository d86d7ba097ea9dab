//! Command-line interface parsing and handling

pub mod chat;
pub mod render;
pub mod say;

#[cfg(test)]
mod tests;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::core::classifier::RelayClassifier;
use crate::core::config::Config;
use crate::core::conversation::{Conversation, ConversationSettings};
use crate::core::driver::ConversationDriver;
use crate::core::transport::{RelayClient, Transport};
use crate::logging;
use crate::server::{self, RelayState};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "spoilerfree")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Spoiler-free chat about movies, series, anime, books and games")]
#[command(
    long_about = "spoilerfree is a terminal chat client and relay for talking about stories \
without having them spoiled. The relay forwards the conversation to an OpenAI-compatible \
provider with spoiler-free instructions and works out which work you are discussing and how \
far into it you are.\n\n\
Environment Variables:\n\
  SPOILERFREE_API_KEY  Provider API key used by `spoilerfree serve`\n\
  OPENAI_API_KEY       Fallback provider API key\n\
  OPENAI_BASE_URL      Provider base URL (defaults to https://api.openai.com/v1)\n\
  SPOILERFREE_LOG      Log filter (defaults to spoilerfree=info)\n\n\
Config keys (for set/unset):\n\
  relay-url, danger-mode, stream, classify-timeout, model, base-url, bind\n\n\
Chat commands:\n\
  /reset               Start a new conversation\n\
  /quit                Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Relay endpoint to talk to
    #[arg(long, global = true, value_name = "URL")]
    pub relay: Option<String>,

    /// Turn off spoiler protection
    #[arg(long, global = true)]
    pub danger: bool,

    /// Keep spoiler protection on even if the config file turns it off
    #[arg(long, global = true, conflicts_with = "danger")]
    pub safe: bool,

    /// Wait for whole replies instead of streaming them
    #[arg(long = "no-stream", global = true)]
    pub no_stream: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Ask a single question and print the answer
    Say {
        /// The question to ask
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Run the relay endpoint
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Set a configuration value
    Set {
        key: String,
        #[arg(required = true, trailing_var_arg = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset { key: String },
}

impl Args {
    fn load_config(&self) -> Result<Config, Box<dyn Error>> {
        let config = match &self.config {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        };
        Ok(config)
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::get_config_path)
    }

    /// Flags win over the config file.
    pub fn conversation_settings(&self, config: &Config) -> ConversationSettings {
        let from_config = config.conversation_settings();
        ConversationSettings {
            stream: from_config.stream && !self.no_stream,
            danger_mode: !self.safe && (from_config.danger_mode || self.danger),
        }
    }

    pub fn relay_url<'a>(&'a self, config: &'a Config) -> &'a str {
        self.relay.as_deref().unwrap_or_else(|| config.relay_url())
    }
}

/// Wires a conversation to the relay at `relay_url`.
pub fn build_driver(
    relay_url: &str,
    settings: ConversationSettings,
    config: &Config,
) -> ConversationDriver {
    let transport: Arc<dyn Transport> =
        Arc::new(RelayClient::new(reqwest::Client::new(), relay_url));
    let classifier =
        RelayClassifier::new(Arc::clone(&transport)).with_timeout(config.classify_timeout());
    ConversationDriver::new(
        Conversation::new(settings),
        transport,
        Arc::new(classifier),
    )
}

/// Applies one `set` (with a value) or `unset` to the file at `path`.
pub fn update_config_file(
    path: &Path,
    key: &str,
    value: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_from_path(path)?;
    match value {
        Some(value) => config.set_value(key, value)?,
        None => config.unset_value(key)?,
    }
    config.save_to_path(path)
}

fn edit_config(args: &Args, key: &str, value: Option<&str>) -> Result<(), Box<dyn Error>> {
    let Some(path) = args.config_path() else {
        eprintln!("❌ No configuration directory is available; pass --config <PATH>");
        std::process::exit(1);
    };
    if let Err(err) = update_config_file(&path, key, value) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
    match value {
        Some(value) => println!("✅ Set {key} to: {value}"),
        None => println!("✅ Unset {key}"),
    }
    Ok(())
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(logging::DEFAULT_DIRECTIVES);

    let config = match args.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ {err}");
            std::process::exit(1);
        }
    };

    match &args.command {
        None | Some(Commands::Chat) => {
            let settings = args.conversation_settings(&config);
            let driver = build_driver(args.relay_url(&config), settings, &config);
            chat::run_chat(driver).await
        }
        Some(Commands::Say { prompt }) => {
            let settings = args.conversation_settings(&config);
            let driver = build_driver(args.relay_url(&config), settings, &config);
            say::run_say(driver, prompt).await
        }
        Some(Commands::Serve { bind }) => {
            let bind = bind.as_deref().unwrap_or_else(|| config.bind_address());
            let state = Arc::new(RelayState::from_config(&config, reqwest::Client::new()));
            server::bind_and_serve(bind, state).await
        }
        Some(Commands::Set { key, value }) => edit_config(&args, key, Some(&value.join(" "))),
        Some(Commands::Unset { key }) => edit_config(&args, key, None),
    }
}
