//! unillm command-line binary.

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "unillm", version, about = "Multi-step LLM agent runner")]
struct Cli {
    /// Config file (default: ~/.unillm/config.toml).
    #[arg(long, global = true, env = "UNILLM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one prompt through the agent loop and stream the answer.
    Run {
        prompt: String,
        /// Override general.model.
        #[arg(long)]
        model: Option<String>,
        /// Override agent.max_steps.
        #[arg(long)]
        max_steps: Option<usize>,
        /// Use non-streaming model calls.
        #[arg(long)]
        no_stream: bool,
    },
    /// Validate config and report which provider and key would be used.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            prompt,
            model,
            max_steps,
            no_stream,
        } => {
            runner::run(runner::RunOptions {
                config_path: cli.config,
                prompt,
                model,
                max_steps,
                no_stream,
            })
            .await
        }
        Command::Doctor => runner::doctor(cli.config).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,unillm=debug,uni_llm=debug,uni_agent=debug,uni_tools=debug"),
    };
    let log_format = std::env::var("UNILLM_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr; stdout carries the model's answer.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported UNILLM_LOG_FORMAT={other:?}; expected one of: json, pretty"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}
