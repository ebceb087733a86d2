mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{
    Conversation, Journal, Orchestrator, Outcome, Provider, StdioConnector, ToolExecutionClient,
};
use storage::{Event, EventKind, EventStore, Role};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "tiller.toml";

#[derive(Parser)]
#[command(name = "tiller")]
#[command(about = "Let a language model drive a tool host", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer
    Ask {
        /// The question
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Start an interactive chat session
    Chat,
    /// List the tools the host declares
    Tools,
    /// List recorded sessions
    #[command(alias = "conversations")]
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show event logs for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (message, tool_call, tool_result, run_end)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

type TillerOrchestrator = Orchestrator<Provider, StdioConnector>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Ask { question }) => {
            let config = Config::load_or_default(&cli.config)?;
            cmd_ask(&config, &question.join(" ")).await
        }
        Some(Commands::Chat) | None => {
            let config = Config::load_or_default(&cli.config)?;
            cmd_chat(&config).await
        }
        Some(Commands::Tools) => {
            let config = Config::load_or_default(&cli.config)?;
            cmd_tools(&config).await
        }
        Some(Commands::Sessions { limit }) => cmd_sessions(limit),
        Some(Commands::Logs { session, kind }) => cmd_logs(&session, kind.as_deref()),
    }
}

fn build_orchestrator(config: &Config) -> Result<TillerOrchestrator> {
    let provider = config.provider(|name| std::env::var(name).ok())?;
    let client = ToolExecutionClient::new(StdioConnector::new(config.host()?));
    let journal = Journal::start(create_store()?)?;
    info!(backend = %provider, conversation = %journal.conversation_id(), "orchestrator ready");

    Ok(Orchestrator::new(provider, client, config.orchestrator()).with_journal(journal))
}

async fn cmd_ask(config: &Config, question: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let run = orchestrator
        .run_scoped(&config.orchestrator.system_prompt, question)
        .await;
    finish_journal(&orchestrator);

    match run.outcome {
        Outcome::Answer(text) => println!("{text}"),
        Outcome::TruncatedAnswer(text) => {
            println!("{text}");
            eprintln!(
                "(stopped after {} iterations without a final answer)",
                run.stats.iterations
            );
        }
        Outcome::FatalError(err) => return Err(err.into()),
    }
    Ok(())
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("tiller v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = build_orchestrator(config)?;
    let session = orchestrator.client().open().await?;

    if let Some(journal) = orchestrator.journal() {
        println!("Session ID: {}", journal.conversation_id());
    }
    println!("Model: {}", config.model());
    println!("Tools: {}", session.catalog().len());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history: Option<Conversation> = None;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let run = match history.take() {
            Some(history) => orchestrator.run_continuing(&session, history, input).await,
            None => {
                orchestrator
                    .run(&session, &config.orchestrator.system_prompt, input)
                    .await
            }
        };
        history = Some(run.conversation);

        match run.outcome {
            Outcome::Answer(text) => println!("\n{text}\n"),
            Outcome::TruncatedAnswer(text) => {
                println!("\n{text}\n(stopped after {} iterations)\n", run.stats.iterations)
            }
            Outcome::FatalError(err) => {
                eprintln!("Error: {err}\n");
                if session.is_closed() {
                    warn!("tool host is gone, ending chat");
                    break;
                }
            }
        }
    }

    orchestrator.client().close(&session).await;
    finish_journal(&orchestrator);
    println!("\nSession ended.");
    Ok(())
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let client = ToolExecutionClient::new(StdioConnector::new(config.host()?));
    let session = client.open().await?;

    for tool in session.catalog().descriptors() {
        println!("{}  {}", tool.name, tool.description);
        for (name, spec) in &tool.parameters {
            let required = if spec.required { "required" } else { "optional" };
            let description = spec.description.as_deref().unwrap_or("");
            println!("    {name}: {} ({required}) {description}", spec.kind);
        }
    }

    client.close(&session).await;
    Ok(())
}

fn finish_journal(orchestrator: &TillerOrchestrator) {
    if let Some(journal) = orchestrator.journal() {
        journal.finish();
    }
}

fn cmd_sessions(limit: usize) -> Result<()> {
    let store = open_store()?;
    let sessions = store.list_conversations()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<6}  {:<6}  STATUS",
        "SESSION ID", "STARTED", "MSGS", "RUNS"
    );
    println!("{}", "-".repeat(86));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = if summary.ended_at.is_some() {
            "ended"
        } else {
            "active"
        };
        println!(
            "{:<36}  {:<20}  {:<6}  {:<6}  {status}",
            summary.id, started, summary.message_count, summary.run_count
        );
    }

    Ok(())
}

fn cmd_logs(session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store()?;

    // Find session by prefix
    let sessions = store.list_conversations()?;
    let matching: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(session_prefix))
        .collect();

    let session_id = match matching.as_slice() {
        [] => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        [only] => only.id,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_events(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::ConversationStart => {
            println!("[{time}] === Session started ===");
        }
        EventKind::ConversationEnd => {
            println!("[{time}] === Session ended ===");
        }
        EventKind::Message { role, content } => {
            let role_str = match role {
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
                Role::System => "SYSTEM",
            };
            println!("[{time}] {role_str}: {}", truncate(content, 200));
        }
        EventKind::ToolCall {
            call_id,
            name,
            input,
        } => {
            println!("[{time}] TOOL CALL {call_id}: {name} {input}");
        }
        EventKind::ToolResult {
            call_id,
            name,
            output,
            error_kind,
        } => match error_kind {
            Some(kind) => println!("[{time}] TOOL ERROR {call_id}: {name} [{kind}] {output}"),
            None => println!(
                "[{time}] TOOL RESULT {call_id}: {name} {}",
                truncate(&output.to_string(), 200)
            ),
        },
        EventKind::RunEnd {
            outcome,
            iterations,
            tool_calls,
            error,
        } => {
            println!(
                "[{time}] --- run ended: {outcome} ({iterations} iterations, {tool_calls} tool calls) ---"
            );
            if let Some(error) = error {
                println!("[{time}]     error: {error}");
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn db_path() -> PathBuf {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".tiller".into());
    data_dir.join("events.db")
}

fn create_store() -> Result<EventStore> {
    let db_path = db_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(EventStore::open(&db_path)?)
}

fn open_store() -> Result<EventStore> {
    let db_path = db_path();

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(EventStore::open(&db_path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/tiller"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("tiller"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("tiller"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
