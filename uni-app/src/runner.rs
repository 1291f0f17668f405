use crate::config::UnillmConfig;
use anyhow::Result;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use uni_agent::{Agent, AgentError, GenerateTextResult};
use uni_llm::{ClientConfig, Message, StreamChunk, connect};
use uni_tools::{ClockTool, ToolRegistry, TypedToolAdapter};

pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub prompt: String,
    pub model: Option<String>,
    pub max_steps: Option<usize>,
    pub no_stream: bool,
}

pub async fn run(options: RunOptions) -> Result<()> {
    let mut cfg = UnillmConfig::load(options.config_path).await?;
    if let Some(model) = options.model {
        cfg.general.model = model;
    }
    if let Some(max_steps) = options.max_steps {
        cfg.agent.max_steps = max_steps;
    }
    if options.no_stream {
        cfg.agent.stream = false;
    }
    cfg.validate()?;

    let model = connect(&cfg.client_config()?)?;
    let agent = Agent::new(model, build_registry(&cfg)?, cfg.agent_settings());

    let mut messages = Vec::new();
    if let Some(system) = cfg.general.system_prompt.as_deref() {
        if !system.trim().is_empty() {
            messages.push(Message::system(system));
        }
    }
    messages.push(Message::user(options.prompt));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("ctrl-c received; cancelling run");
        ctrl_c.cancel();
    });

    let (stream_tx, stream_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(print_deltas(stream_rx));

    let outcome = agent.generate_text(messages, &cancel, Some(stream_tx)).await;
    let printed = printer.await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "stream printer task failed");
        false
    });

    match outcome {
        Ok(result) => report(&result, printed).await,
        Err(AgentError::Cancelled { snapshot }) => {
            eprintln!("\ncancelled after {} step(s)", snapshot.steps.len());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes text deltas to stdout as they arrive. Returns whether anything was printed.
async fn print_deltas(mut rx: UnboundedReceiver<StreamChunk>) -> bool {
    let mut stdout = tokio::io::stdout();
    let mut printed = false;
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::TextDelta { text } => {
                printed = true;
                if stdout.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            StreamChunk::Error { error } => {
                tracing::warn!(message = %error.message, code = ?error.code, "model stream error");
            }
            _ => {}
        }
    }
    printed
}

async fn report(result: &GenerateTextResult, streamed: bool) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    if !streamed {
        if let Some(text) = result.text.as_deref() {
            stdout.write_all(text.as_bytes()).await?;
        }
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    for call in &result.tool_calls {
        eprintln!("unanswered tool call: {} {}", call.name, call.arguments);
    }
    if let Some(error) = result.steps.last().and_then(|s| s.error.as_ref()) {
        eprintln!("model error: {}", error.message);
    }
    eprintln!(
        "steps={} finish={:?} tokens in={} out={} total={}",
        result.steps.len(),
        result.finish_reason,
        result.usage.input_tokens,
        result.usage.output_tokens,
        result.usage.total_tokens,
    );
    Ok(())
}

fn build_registry(cfg: &UnillmConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    if cfg.tools.clock {
        registry.register(TypedToolAdapter::new(ClockTool::new()))?;
    }
    let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
    tracing::debug!(tools = ?names, "tool registry built");
    Ok(registry)
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = UnillmConfig::load(config_path).await?;
    let provider = cfg.provider();
    let client: Option<ClientConfig> = cfg.client_config().ok();
    let registry = build_registry(&cfg)?;

    println!("model:      {}", cfg.general.model);
    println!("provider:   {}", provider.as_str());
    println!(
        "api key:    {}",
        match cfg.api_key_for_model() {
            Some(key) => mask_key(&key),
            None => "missing".to_string(),
        }
    );
    println!(
        "base url:   {}",
        client
            .as_ref()
            .and_then(|c| c.base_url.as_deref())
            .unwrap_or("provider default")
    );
    println!("max steps:  {}", cfg.agent.max_steps);
    println!("streaming:  {}", cfg.agent.stream);
    println!("timeout:    {}s", cfg.http.timeout_secs);
    println!("tools:      {}", registry.len());

    if client.is_none() {
        return Err(anyhow::anyhow!(
            "no API key for provider {}; set it in [keys] or the environment",
            provider.as_str()
        ));
    }
    tracing::info!(model = %cfg.general.model, provider = provider.as_str(), "config ok");
    Ok(())
}

fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}
