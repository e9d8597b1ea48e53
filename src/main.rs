use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rassist_lib::config::{default_api_config_path, load_api_config, save_api_config};
use rassist_lib::export::{export_text, resolve_export_path};
use rassist_lib::models::anthropic::AnthropicClient;
use rassist_lib::prompt::PromptTemplate;
use rassist_lib::render::TerminalRenderer;
use rassist_lib::{ApiConfig, ChatError, ChatManager, ModelClient, TurnOutput};

const LOG_ENV: &str = "RASSIST_LOG";

#[derive(Parser)]
#[command(name = "rassist", version, about = "R programming assistant for the terminal")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "RASSIST_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question and print the answer
    Ask {
        #[command(flatten)]
        turn: TurnArgs,

        /// The question; multiple words are joined with spaces
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Start an interactive conversation
    Chat {
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Inspect or change the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct TurnArgs {
    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature in [0, 1]
    #[arg(long)]
    temperature: Option<f32>,

    /// Wait for the whole answer instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Send questions as typed, without the R assistant prompt
    #[arg(long)]
    plain: bool,

    /// Write each finished answer to this file or directory
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with the key redacted
    Show,
    /// Store an API key in the config file
    SetKey { key: String },
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(default_api_config_path);
    debug!(path = %config_path.display(), "using config file");

    match cli.command {
        Command::Ask { turn, question } => {
            let question = question.join(" ");
            ask(&config_path, &turn, &question).await
        }
        Command::Chat { turn } => chat(&config_path, &turn).await,
        Command::Config { action } => config_command(&config_path, action),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rassist=debug,rassist_lib=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn effective_config(path: &Path, turn: &TurnArgs) -> Result<ApiConfig> {
    let mut config = load_api_config(path)?;
    config.apply_env_overrides();

    if let Some(model) = &turn.model {
        config.model_id = model.clone();
    }
    if let Some(max_tokens) = turn.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(temperature) = turn.temperature {
        config.temperature = temperature;
    }
    if turn.no_stream {
        config.stream = false;
    }
    Ok(config)
}

fn build_session(path: &Path, turn: &TurnArgs) -> Result<(ChatManager, AnthropicClient)> {
    let config = effective_config(path, turn)?;
    config.validate()?;

    let client = AnthropicClient::new(&config)?;
    let template = if turn.plain {
        PromptTemplate::Plain
    } else {
        PromptTemplate::RAssistant
    };
    Ok((ChatManager::new(config).with_template(template), client))
}

/// Run one turn with Ctrl-C wired to cancellation. `Ok(None)` means the turn
/// was cancelled.
async fn run_turn(
    manager: &mut ChatManager,
    client: &dyn ModelClient,
    input: &str,
    export: Option<&Path>,
) -> Result<Option<TurnOutput>> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut renderer = TerminalRenderer::stdout();
    let result = manager.submit(client, input, &mut renderer, &cancel).await;
    watcher.abort();
    let written = renderer.finish();

    let output = match result {
        Ok(output) => output,
        Err(ChatError::Cancelled) => {
            eprintln!("[cancelled]");
            return Ok(None);
        }
        Err(err) => {
            if let Some(partial) = err.partial_output() {
                debug!(partial_len = partial.len(), "turn failed after partial output");
                eprintln!("[answer incomplete]");
            }
            return Err(err.into());
        }
    };
    written.context("failed to write answer to stdout")?;

    if let Some(target) = export {
        let path = resolve_export_path(target, Local::now());
        let path = export_text(&path, &output.text)?;
        eprintln!("saved answer to {}", path.display());
    }
    Ok(Some(output))
}

async fn ask(config_path: &Path, turn: &TurnArgs, question: &str) -> Result<()> {
    let (mut manager, client) = build_session(config_path, turn)?;
    run_turn(&mut manager, &client, question, turn.export.as_deref()).await?;
    Ok(())
}

async fn chat(config_path: &Path, turn: &TurnArgs) -> Result<()> {
    let (mut manager, client) = build_session(config_path, turn)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "rassist using {}. Type /help for commands, Ctrl-C cancels an answer.",
        manager.config().model_id
    );

    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => {
                eprintln!("/history  show this conversation");
                eprintln!("/new      start a new conversation");
                eprintln!("/exit     leave");
            }
            "/history" => print_history(&manager),
            "/new" => {
                manager.new_conversation();
                eprintln!("started a new conversation");
            }
            _ => {
                if let Err(e) =
                    run_turn(&mut manager, &client, input, turn.export.as_deref()).await
                {
                    eprintln!("error: {:#}", e);
                }
            }
        }
    }
    Ok(())
}

fn print_history(manager: &ChatManager) {
    let conversation = manager.conversation();
    if conversation.is_empty() {
        eprintln!("(no turns yet)");
        return;
    }

    eprintln!("{} ({} turns)", conversation.metadata.title, conversation.len());
    for turn in conversation.iter() {
        let first_line = turn.content().lines().next().unwrap_or("");
        eprintln!("  {:>9}: {}", turn.role().as_str(), first_line);
    }
}

fn config_command(path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_api_config(path)?;
            config.apply_env_overrides();

            let mut shown = serde_json::to_value(&config)?;
            shown["api_key"] = serde_json::Value::String(config.redacted_key());
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::SetKey { key } => {
            let mut config = load_api_config(path)?;
            config.api_key = key.trim().to_string();
            save_api_config(path, &config)?;
            println!("saved API key to {}", path.display());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}
