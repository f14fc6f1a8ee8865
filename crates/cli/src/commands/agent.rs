//! `socmate ask` and `socmate chat` — drive the agent from the terminal.

use anyhow::{Context, bail};
use socmate_agent::{Agent, AgentEvent, AgentHandle, EventSink, RunOutcome};
use socmate_config::AppConfig;
use socmate_providers::OpenAiCompatClient;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const DEFAULT_SYSTEM_PROMPT: &str = "You are socmate, an assistant for SoC and digital hardware design. \
You can run shell commands (simulators, linters, synthesis, make) and read files in the working directory. \
Inspect before you change anything, keep answers concise, and quote file paths and error messages exactly.";

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

pub async fn ask(config_path: Option<&Path>, query: &str, verbose: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let (sink, mut events) = EventSink::channel();
    let mut agent = build_agent(&config, sink)?;
    let handle = agent.handle();

    let (answer, failure) = supervise(agent.run(query), &handle, &mut events, None, verbose).await;
    if let Some(message) = failure {
        bail!("{message}");
    }
    println!("{answer}");
    Ok(())
}

pub async fn chat(config_path: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let (sink, mut events) = EventSink::channel();
    let mut agent = build_agent(&config, sink)?;
    let handle = agent.handle();
    let mut lines = spawn_stdin_reader();

    println!();
    println!("  socmate — interactive mode");
    println!("  Model:  {}", config.model);
    println!("  Tools:  shell, file_read");
    println!();
    println!("  Type a request and press Enter. Lines typed while a request runs are queued.");
    println!("  Ctrl+C aborts the running request; 'exit' or Ctrl+C at the prompt quits.");
    println!("  /reset clears the history, /usage shows token totals.");
    println!();

    loop {
        print!("  you > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let request = line.trim().to_string();
        match request.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                agent.reset();
                eprintln!("  [history cleared]");
                continue;
            }
            "/usage" => {
                let (input, output) = handle.token_usage();
                eprintln!("  [tokens] input {input}, output {output}");
                continue;
            }
            _ => {}
        }

        println!();
        let (outcome, _) = supervise(agent.run_stream(request), &handle, &mut events, Some(&mut lines), verbose).await;
        match outcome {
            RunOutcome::Complete(_) => println!(),
            RunOutcome::Aborted(_) => eprintln!("\n  [aborted]"),
            RunOutcome::Failed(message) => eprintln!("\n  [error] {message}"),
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

fn build_agent(config: &AppConfig, events: EventSink) -> anyhow::Result<Agent> {
    // Local OpenAI-compatible servers usually run without a key.
    if !config.has_api_key() && config.api_url.trim_end_matches('/') == DEFAULT_API_URL {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set SOCMATE_API_KEY (or OPENAI_API_KEY), or add api_key to");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let client = OpenAiCompatClient::from_config(config).context("Failed to build the model client")?;
    let tools = Arc::new(socmate_tools::default_registry());
    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    Ok(Agent::new(Arc::new(client), tools, config.agent.clone())
        .with_system_prompt(system_prompt)
        .with_events(events))
}

/// Await `run` while rendering its events, forwarding typed lines to the
/// injection queue and turning Ctrl+C into an abort. Returns the run's
/// output and the `RunError` message, if any.
async fn supervise<T>(
    run: impl Future<Output = T>,
    handle: &AgentHandle,
    events: &mut mpsc::UnboundedReceiver<AgentEvent>,
    mut lines: Option<&mut mpsc::UnboundedReceiver<String>>,
    verbose: bool,
) -> (T, Option<String>) {
    let mut failure = None;
    tokio::pin!(run);

    let output = loop {
        tokio::select! {
            output = &mut run => break output,
            Some(event) = events.recv() => render(event, verbose, &mut failure),
            Some(line) = next_line(&mut lines) => {
                let line = line.trim().to_string();
                if !line.is_empty() {
                    handle.queue_request(line);
                    eprintln!("  [queued]");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    eprintln!("\n  [aborting...]");
                    handle.abort();
                }
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        render(event, verbose, &mut failure);
    }
    (output, failure)
}

async fn next_line(lines: &mut Option<&mut mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn render(event: AgentEvent, verbose: bool, failure: &mut Option<String>) {
    match event {
        AgentEvent::ContentChunk { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ReasoningChunk { text } if verbose => eprint!("{text}"),
        AgentEvent::ToolCalled { name, arguments } => {
            eprintln!("  [tool] {name} {}", preview(&arguments, 120));
        }
        AgentEvent::ToolResult { name, result } => {
            eprintln!("  [tool] {name} -> {}", preview(&result, 200));
        }
        AgentEvent::VerboseOutput { text } if verbose => eprintln!("  [debug] {text}"),
        AgentEvent::Compacting {
            layer,
            before_tokens,
            after_tokens,
        } => eprintln!("  [context] layer {layer} compaction: {before_tokens} -> {after_tokens} tokens"),
        AgentEvent::StuckDetected { silent_seconds, .. } => {
            eprintln!("  [stalled] no progress for {silent_seconds}s");
        }
        AgentEvent::Retrying {
            attempt,
            max_attempts,
            error,
        } => eprintln!("  [retry {attempt}/{max_attempts}] {error}"),
        AgentEvent::ProcessingQueuedRequest { text, .. } => eprintln!("  [injecting] {text}"),
        AgentEvent::RunError { message } => *failure = Some(message),
        _ => {}
    }
}

/// First line of `text`, cut to `max_chars`.
fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    match line.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None if line.len() < text.trim_end().len() => format!("{line}..."),
        None => line.to_string(),
    }
}
