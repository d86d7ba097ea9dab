use super::*;

fn parse_args(argv: &[&str]) -> Args {
    Args::try_parse_from(argv)
        .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
}

#[test]
fn chat_is_the_default_command() {
    let args = parse_args(&["spoilerfree"]);
    assert_eq!(args.command, None);
    assert!(!args.danger);
    assert!(!args.no_stream);
    assert_eq!(args.relay, None);
}

#[test]
fn global_flags_are_accepted_after_subcommands() {
    let args = parse_args(&[
        "spoilerfree",
        "chat",
        "--danger",
        "--no-stream",
        "--relay",
        "http://localhost:9000/api/chat",
    ]);
    assert_eq!(args.command, Some(Commands::Chat));
    assert!(args.danger);
    assert!(args.no_stream);
    assert_eq!(args.relay.as_deref(), Some("http://localhost:9000/api/chat"));
}

#[test]
fn say_collects_the_whole_prompt() {
    let args = parse_args(&["spoilerfree", "say", "who", "is", "-", "the", "killer?"]);
    assert_eq!(
        args.command,
        Some(Commands::Say {
            prompt: vec!["who", "is", "-", "the", "killer?"]
                .into_iter()
                .map(String::from)
                .collect(),
        })
    );
}

#[test]
fn serve_accepts_bind_address() {
    let args = parse_args(&["spoilerfree", "serve", "--bind", "0.0.0.0:8080"]);
    assert_eq!(
        args.command,
        Some(Commands::Serve {
            bind: Some("0.0.0.0:8080".to_string()),
        })
    );
}

#[test]
fn flags_override_config_file() {
    let config = Config {
        relay_url: Some("http://config.example/api/chat".to_string()),
        stream: Some(true),
        danger_mode: Some(false),
        ..Config::default()
    };

    let args = parse_args(&["spoilerfree"]);
    assert_eq!(args.relay_url(&config), "http://config.example/api/chat");
    assert_eq!(
        args.conversation_settings(&config),
        ConversationSettings {
            stream: true,
            danger_mode: false,
        }
    );

    let args = parse_args(&[
        "spoilerfree",
        "--danger",
        "--no-stream",
        "--relay",
        "http://flag.example/api/chat",
    ]);
    assert_eq!(args.relay_url(&config), "http://flag.example/api/chat");
    assert_eq!(
        args.conversation_settings(&config),
        ConversationSettings {
            stream: false,
            danger_mode: true,
        }
    );
}

#[test]
fn config_file_danger_mode_survives_without_flag() {
    let config = Config {
        danger_mode: Some(true),
        stream: Some(false),
        ..Config::default()
    };
    let settings = parse_args(&["spoilerfree"]).conversation_settings(&config);
    assert!(settings.danger_mode);
    assert!(!settings.stream);
}

#[test]
fn built_driver_starts_idle_with_settings() {
    let settings = ConversationSettings {
        stream: false,
        danger_mode: true,
    };
    let driver = build_driver("http://127.0.0.1:9/api/chat", settings, &Config::default());
    assert_eq!(driver.conversation().settings(), settings);
    assert!(!driver.view().is_loading);
    assert!(driver.view().messages.is_empty());
}

#[test]
fn safe_flag_overrides_config_danger_mode() {
    let config = Config {
        danger_mode: Some(true),
        ..Config::default()
    };
    let settings =
        parse_args(&["spoilerfree", "say", "--safe", "hi"]).conversation_settings(&config);
    assert!(!settings.danger_mode);
}

#[test]
fn safe_and_danger_conflict() {
    assert!(Args::try_parse_from(["spoilerfree", "--safe", "--danger"]).is_err());
}

#[test]
fn set_and_unset_parse() {
    let args = parse_args(&[
        "spoilerfree",
        "set",
        "relay-url",
        "http://localhost:9000/api/chat",
    ]);
    assert_eq!(
        args.command,
        Some(Commands::Set {
            key: "relay-url".to_string(),
            value: vec!["http://localhost:9000/api/chat".to_string()],
        })
    );

    let args = parse_args(&["spoilerfree", "unset", "danger-mode"]);
    assert_eq!(
        args.command,
        Some(Commands::Unset {
            key: "danger-mode".to_string(),
        })
    );

    assert!(Args::try_parse_from(["spoilerfree", "set", "stream"]).is_err());
}

#[test]
fn update_config_file_saves_and_clears_values() {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("spoilerfree").join("config.toml");

    update_config_file(&path, "danger-mode", Some("true")).expect("set failed");
    update_config_file(&path, "model", Some("tiny-model")).expect("set failed");
    let saved = Config::load_from_path(&path).expect("load failed");
    assert_eq!(saved.danger_mode, Some(true));
    assert_eq!(saved.model(), "tiny-model");

    update_config_file(&path, "danger-mode", None).expect("unset failed");
    let saved = Config::load_from_path(&path).expect("load failed");
    assert_eq!(saved.danger_mode, None);
    assert_eq!(saved.model(), "tiny-model");

    assert!(update_config_file(&path, "colour", Some("blue")).is_err());
    assert!(update_config_file(&path, "stream", Some("sometimes")).is_err());
    assert_eq!(Config::load_from_path(&path).expect("load failed"), saved);
}
