//! Reference terminal client for the chat widget runtime.
//!
//! Opens a session against a bot webhook, prints everything the bot emits,
//! and relays stdin lines as user input.
//!
//! Usage:
//!   CW_HOOK_URL=https://api.canvas.twyla.ai/widget-hook/acme/faq \
//!   CW_API_KEY=secret cw-hello-widget
//!
//! Env vars:
//!   CW_CONFIG    — TOML config file (default: widget.toml, optional)
//!   CW_HOOK_URL  — webhook address (overrides the config file)
//!   CW_API_KEY   — API key (overrides the config file)
//!   RUST_LOG     — log filter (default: info)

mod commands;

use clap::Parser;
use cw_domain::config::{ConfigSeverity, WidgetConfig};
use cw_widget_sdk::{MadeBy, SessionConfig, WidgetClientBuilder, WidgetHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use commands::Input;

/// Talk to a bot from the terminal.
#[derive(Debug, Parser)]
#[command(name = "cw-hello-widget", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "CW_CONFIG", default_value = "widget.toml")]
    config: String,
    /// Webhook address of the bot.
    #[arg(long, env = "CW_HOOK_URL")]
    hook_url: Option<String>,
    /// API key sent with the handshake and every message.
    #[arg(long, env = "CW_API_KEY")]
    api_key: Option<String>,
    /// Ask the bot not to log this conversation.
    #[arg(long)]
    no_logging: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = WidgetConfig::load_or_default(&cli.config);
    if let Some(hook_url) = cli.hook_url {
        config.hook_url = hook_url;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = api_key;
    }
    if cli.no_logging {
        config.logging = false;
    }

    let issues = config.validate();
    for issue in &issues {
        eprintln!("{issue}");
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("invalid configuration ({})", cli.config);
    }

    let shutdown = CancellationToken::new();
    let widget = WidgetClientBuilder::from_config(&config)
        .build()?
        .spawn(shutdown.clone());

    widget.on_connection_change(|up| {
        tracing::info!(connected = up, "notification channel");
    });

    let session = SessionConfig {
        hook_url: config.hook_url.clone(),
        api_key: config.api_key.clone(),
        logging: config.logging,
    };

    let outcome = tokio::select! {
        r = widget.init(session, |text| println!("bot> {text}")) => r?,
        _ = tokio::signal::ctrl_c() => {
            shutdown.cancel();
            return Ok(());
        }
    };

    println!("── {} ──", outcome.bot_name);
    for turn in &outcome.history {
        let who = match turn.made_by {
            MadeBy::User => "you",
            MadeBy::Bot => "bot",
        };
        println!("{who}> {}", turn.content);
    }
    if outcome.history.is_empty() {
        widget.initiate_conversation();
    }
    println!("{}", commands::HELP);

    let result = relay_stdin(&widget).await;
    shutdown.cancel();
    result
}

/// Forward stdin lines until EOF, Ctrl-C, or a command that ends the session.
async fn relay_stdin(widget: &WidgetHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match commands::parse(&line) {
            Input::Say(text) => widget.send(text),
            Input::Id => match widget.user_id().await {
                Ok(id) => println!("session id: {id}"),
                Err(e) => eprintln!("no session id: {e}"),
            },
            Input::Logging(enabled) => {
                widget.toggle_logging(enabled);
                println!("logging {}", if enabled { "on" } else { "off" });
            }
            Input::End => {
                widget.end_session();
                return Ok(());
            }
            Input::Clear => {
                widget.clear_session();
                // Wait for the driver to apply the clear before exiting.
                let _ = widget.is_logging().await;
                return Ok(());
            }
            Input::Quit => return Ok(()),
            Input::Empty => {}
            Input::Unknown(cmd) => eprintln!("unknown command {cmd:?}; {}", commands::HELP),
        }
    }
}
