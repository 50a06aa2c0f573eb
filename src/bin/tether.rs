//! tether - Run Claude Code turns from a terminal
//!
//! Hosts the engine the way an editor panel would: every UI event is
//! printed to stdout as one JSON line, permission prompts are answered on
//! stdin, logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # One turn, resuming nothing
//! tether send "explain src/lib.rs"
//!
//! # Plan first, think hard, on opus
//! tether send --plan --think --model opus "split the parser module"
//!
//! # Manage always-allow rules
//! tether permissions list
//! tether permissions allow Bash --pattern "npm test *"
//! tether permissions remove Bash --pattern "npm test *"
//!
//! # Show the pattern a command would be remembered as
//! tether pattern git commit -m "wip"
//!
//! # Debug logging
//! RUST_LOG=tether_engine=debug tether send "hi"
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::{command_pattern, AllowRule, ModelChoice, PermissionDecision};
use tether_engine::permissions::NotifyWatcher;
use tether_engine::{
    spawn_broker, spawn_session, BrokerHandle, ChannelSink, Collaborators, Dispatch, EngineConfig,
    EventSink, PermissionStore, TerminalOpener, TurnRequest,
};
use tether_protocol::UiEvent;

/// tether - drive the Claude Code CLI
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Args {
    /// Config file (default: <config dir>/tether/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message and stream the turn's events
    Send {
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,

        /// Ask for a plan and wait for approval before changes
        #[arg(long)]
        plan: bool,

        /// Prefix the configured thinking directive
        #[arg(long)]
        think: bool,

        /// Model override (opus, sonnet, haiku or a full model id)
        #[arg(long)]
        model: Option<String>,

        /// Approve every tool without asking
        #[arg(long)]
        skip_permissions: bool,
    },

    /// Edit always-allow rules
    Permissions {
        #[command(subcommand)]
        action: PermissionsAction,
    },

    /// Print the pattern a shell command is remembered as
    Pattern {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PermissionsAction {
    /// Show all rules
    List,
    /// Always allow a tool, or one command pattern of it
    Allow {
        tool: String,
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Remove a tool's rule, or one of its patterns
    Remove {
        tool: String,
        #[arg(long)]
        pattern: Option<String>,
    },
}

/// Login "terminal" for a host that already is one.
struct PrintTerminal;

impl TerminalOpener for PrintTerminal {
    fn open(&self, name: &str, program: &str, args: &[String]) -> anyhow::Result<()> {
        let command = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "[{name}] Run `{command}` and log in with /login.")?;
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tether=info".parse()?)
                .add_directive("tether_engine=info".parse()?)
                .add_directive("tether_core=info".parse()?)
                .add_directive("tether_protocol=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config_path = args.config.unwrap_or_else(EngineConfig::default_path);
    let config = EngineConfig::load(&config_path);

    match args.command {
        Command::Send {
            text,
            plan,
            think,
            model,
            skip_permissions,
        } => {
            let mut config = config;
            if let Some(model) = model {
                config.model = ModelChoice::from_name(&model);
            }
            config.skip_permissions |= skip_permissions;

            let request = TurnRequest::new(text.join(" "))
                .with_plan(plan)
                .with_thinking(think);
            let failed = run_turn(config, request).await?;
            if failed {
                process::exit(1);
            }
            Ok(())
        }
        Command::Permissions { action } => {
            let store = PermissionStore::new(&config.permissions_file);
            edit_permissions(&store, action).await
        }
        Command::Pattern { command } => {
            println!("{}", command_pattern(&command.join(" ")));
            Ok(())
        }
    }
}

/// Runs one turn to completion. Returns true if an error was reported.
async fn run_turn(config: EngineConfig, request: TurnRequest) -> Result<bool> {
    let (sink, mut events) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let broker = if config.skip_permissions {
        None
    } else {
        let store = Arc::new(PermissionStore::new(&config.permissions_file));
        let broker = spawn_broker(&config, store, sink.clone(), NotifyWatcher::new())
            .await
            .context("Failed to start permission broker")?;
        Some(broker)
    };

    let session = spawn_session(
        config,
        broker.as_ref().map(|b| b.mcp_config().to_path_buf()),
        Collaborators::new(sink).with_terminal(Arc::new(PrintTerminal)),
    );

    let dispatch = session
        .send_turn(request)
        .await
        .context("Session stopped before the turn was sent")?;
    info!(?dispatch, "Turn dispatched");

    let mut prompts = BufReader::new(tokio::io::stdin()).lines();
    let mut failed = dispatch == Dispatch::Failed;
    let mut idle = {
        let session = session.clone();
        tokio::spawn(async move { session.wait_idle().await })
    };

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                failed |= handle_event(&event, broker.as_ref(), &mut prompts).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping turn");
                session.stop().await?;
            }
            _ = &mut idle => break,
        }
    }

    // Everything up to the exit is already queued
    while let Ok(event) = events.try_recv() {
        failed |= handle_event(&event, broker.as_ref(), &mut prompts).await?;
    }

    Ok(failed)
}

/// Prints an event and answers permission prompts. Returns true for
/// error events.
async fn handle_event(
    event: &UiEvent,
    broker: Option<&BrokerHandle>,
    prompts: &mut Lines<BufReader<Stdin>>,
) -> Result<bool> {
    println!("{}", serde_json::to_string(event)?);

    match event {
        UiEvent::PermissionRequest {
            id, tool, pattern, ..
        } => {
            let Some(broker) = broker else {
                bail!("permission request {id} without a broker");
            };
            let subject = pattern.as_deref().unwrap_or(tool);
            eprint!("Allow {subject}? [y]es / [a]lways / [N]o: ");

            let answer = prompts.next_line().await?.unwrap_or_default();
            let decision = match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => PermissionDecision::Approve,
                "a" | "always" => PermissionDecision::AlwaysAllow,
                _ => PermissionDecision::Deny,
            };
            broker.decide(id.clone(), decision).await?;
            Ok(false)
        }
        UiEvent::Error { .. } => Ok(true),
        _ => Ok(false),
    }
}

async fn edit_permissions(store: &PermissionStore, action: PermissionsAction) -> Result<()> {
    match action {
        PermissionsAction::List => {
            let rules = store.list().await;
            if rules.is_empty() {
                println!("No always-allow rules ({})", store.path().display());
            }
            for (tool, rule) in rules.tools() {
                match rule {
                    AllowRule::Blanket(true) => println!("{tool}: all"),
                    AllowRule::Blanket(false) => println!("{tool}: none"),
                    AllowRule::Patterns(patterns) => println!("{tool}: {}", patterns.join(", ")),
                }
            }
        }
        PermissionsAction::Allow { tool, pattern } => match pattern {
            Some(pattern) => store.allow_pattern(&tool, &pattern).await?,
            None => store.allow_tool(&tool).await?,
        },
        PermissionsAction::Remove { tool, pattern } => {
            if !store.remove(&tool, pattern.as_deref()).await? {
                bail!("no rule for {tool}");
            }
        }
    }
    Ok(())
}
