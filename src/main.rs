// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use arne_config::{Config, QueueModeConfig};
use arne_core::{AgentEvent, Command, Controller, DrainMode, ProviderFactory};
use arne_log::SessionLog;
use arne_model::{AnthropicProvider, ApiKeySpec, MockProvider, Provider, StreamEvent, CATALOG};
use arne_tools::{
    BashTool, EditFileTool, GlobTool, GrepTool, ReadFileTool, ToolRegistry, WriteFileTool,
};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        let config = arne_config::load(cli.config.as_deref())?;
        match cmd {
            Commands::Sessions { limit, all } => return print_sessions(&config, *limit, *all),
            Commands::ShowConfig => {
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::ListModels => {
                for entry in CATALOG {
                    println!(
                        "{}/{}  ctx {}k  out {}k",
                        entry.provider,
                        entry.id,
                        entry.context_window / 1000,
                        entry.max_output_tokens / 1000
                    );
                }
                return Ok(());
            }
        }
    }

    let config = Arc::new(arne_config::load(cli.config.as_deref())?);
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let sessions_dir = config.sessions_dir();

    let log = if let Some(path) = &cli.session {
        SessionLog::open(path)?
    } else if cli.ephemeral {
        SessionLog::in_memory(cwd.to_string_lossy())
    } else {
        SessionLog::create(cwd.to_string_lossy(), &sessions_dir)?
    };

    let factory = provider_factory(config.clone());
    let provider = factory(&config.model.provider, &config.model.name)?;
    let tools = Arc::new(tool_registry(&cwd, &config));

    let mut agent = arne_core::Agent::new(log, provider, tools);
    agent.set_auto_compaction(config.agent.auto_compaction);
    agent.set_reserve_tokens(config.agent.reserve_tokens);
    agent.set_queue_mode(match config.agent.queue_mode {
        QueueModeConfig::OneAtATime => DrainMode::OneAtATime,
        QueueModeConfig::All => DrainMode::All,
    });
    agent.set_system_prompt(system_prompt(&cwd));
    subscribe_printer(&agent);

    let mut controller = Controller::new(agent, cwd, sessions_dir, factory);

    if let Some(prompt) = cli.prompt {
        run_command(&mut controller, Command::Prompt { text: prompt }).await;
        return Ok(());
    }
    repl(&mut controller).await
}

/// Minimal line-oriented frontend: plain lines become prompts, `/`-prefixed
/// lines are control commands.  Streaming output is rendered by the event
/// subscriber as it arrives.
async fn repl(controller: &mut Controller) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let command = match input {
            "/quit" | "/exit" => return Ok(()),
            "/compact" => Command::Compact { custom_instructions: None },
            "/stats" => Command::GetSessionStats,
            "/state" => Command::GetState,
            "/tree" => Command::GetTree { include_content: false },
            _ => {
                if let Some(cmd) = input.strip_prefix("/bash ") {
                    Command::Bash { command: cmd.to_string() }
                } else if input.starts_with('/') {
                    eprintln!("unknown command: {input}");
                    continue;
                } else {
                    Command::Prompt { text: input.to_string() }
                }
            }
        };
        run_command(controller, command).await;
    }
}

async fn run_command(controller: &mut Controller, command: Command) {
    let response = controller.dispatch(command).await;
    if !response.success {
        eprintln!("error: {}", response.error.unwrap_or_default());
    } else if let Some(data) = response.data {
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
    }
}

/// Render streamed output to stdout as it arrives.
fn subscribe_printer(agent: &arne_core::Agent) {
    agent.bus().subscribe(Box::new(|event| match event {
        AgentEvent::MessageUpdate { event: StreamEvent::TextDelta { delta, .. } } => {
            print!("{delta}");
            std::io::stdout().flush().ok();
        }
        AgentEvent::MessageEnd { .. } => println!(),
        AgentEvent::ToolExecutionStart { tool_name, args, .. } => {
            eprintln!("[{tool_name}] {args}");
        }
        AgentEvent::ToolExecutionEnd { tool_name, is_error, .. } => {
            if *is_error {
                eprintln!("[{tool_name}] failed");
            }
        }
        AgentEvent::Error { message } => eprintln!("error: {message}"),
        _ => {}
    }));
}

fn tool_registry(cwd: &std::path::Path, config: &Config) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(
        BashTool::new(cwd)
            .with_shell(config.agent.shell.clone())
            .with_timeout_secs(config.agent.tool_timeout_secs),
    );
    reg.register(ReadFileTool::new(cwd));
    reg.register(WriteFileTool::new(cwd));
    reg.register(EditFileTool::new(cwd));
    reg.register(GlobTool::new(cwd));
    reg.register(GrepTool::new(cwd));
    reg
}

fn system_prompt(cwd: &std::path::Path) -> String {
    format!(
        "You are Arne, a coding agent working in {}. Use the provided tools \
         to inspect and modify the working tree; prefer tools over asking \
         the user to run commands. Be concise.",
        cwd.display()
    )
}

/// Build providers from the config's provider table.  Unknown ids fall back
/// to the Anthropic wire format with the id's configured endpoint.
fn provider_factory(config: Arc<Config>) -> ProviderFactory {
    Box::new(move |provider_id, model_id| -> anyhow::Result<Arc<dyn Provider>> {
        if provider_id == "mock" {
            return Ok(Arc::new(MockProvider));
        }
        let pc = config.providers.get(provider_id);
        let key_spec = pc
            .and_then(|p| p.api_key.clone())
            .unwrap_or_else(|| "ANTHROPIC_API_KEY".to_string());
        let api_key = ApiKeySpec::parse(&key_spec).resolve();
        let base_url = pc.and_then(|p| p.base_url.clone());
        Ok(Arc::new(AnthropicProvider::new(model_id, api_key, base_url)))
    })
}

fn print_sessions(config: &Config, limit: usize, all: bool) -> anyhow::Result<()> {
    let dir = config.sessions_dir();
    let sessions = if all {
        arne_log::list_all(&dir, false)?
    } else {
        let cwd = std::env::current_dir()?;
        arne_log::list(&dir, &cwd.to_string_lossy(), false)?
    };
    for s in sessions.iter().take(limit) {
        println!(
            "{}  {}  {} msgs  {}",
            s.modified_at.format("%Y-%m-%d %H:%M"),
            s.session_id,
            s.message_count,
            s.name
                .clone()
                .or_else(|| s.first_user_message.clone())
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
