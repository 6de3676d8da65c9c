//! `choir ask`: Run one Chorus Cycle from the terminal.

use std::sync::Arc;

use choir_chorus::Effect;
use choir_config::AppConfig;
use choir_gateway::GatewayState;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct AskOptions {
    pub prompt: String,
    pub thread: Option<String>,
    pub max_loops: Option<u32>,
    pub json: bool,
}

pub async fn run(options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| choir_core::Error::Config {
        message: e.to_string(),
    })?;

    // Check for API key early so the error is clear
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHOIR_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    if let Some(max_loops) = options.max_loops {
        if max_loops == 0 {
            return Err("--max-loops must be at least 1".into());
        }
        config.chorus.max_loops = max_loops;
    }

    let thread_id = options
        .thread
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let state = Arc::new(GatewayState::from_config(&config));
    info!(
        thread_id = %thread_id,
        model = %config.chat_model,
        max_loops = config.chorus.max_loops,
        "Asking chorus"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Effect>();
    let cycle = state.cycle.clone();
    let run_thread = thread_id.clone();
    let prompt = options.prompt.clone();
    let handle = tokio::spawn(async move { cycle.run_streaming(&run_thread, &prompt, tx).await });

    let mut persists = Vec::new();
    while let Some(effect) = rx.recv().await {
        persists.extend(state.executor.execute(&effect));
        if !options.json
            && let Some(line) = progress_line(&effect)
        {
            eprintln!("{line}");
        }
    }

    let outcome = handle
        .await
        .map_err(|e| format!("Cycle task failed: {e}"))??;

    // let background persistence finish before the runtime shuts down
    for persist in persists {
        if let Err(e) = persist.await {
            warn!(error = %e, "Persistence task failed");
        }
    }
    debug!(
        thread_id = %thread_id,
        iterations = outcome.iterations,
        stages = outcome.stages_executed,
        "Chorus finished"
    );

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome.effects)?);
    } else {
        eprintln!();
        println!("{}", outcome.final_response().unwrap_or_default());
    }

    Ok(())
}

/// One line of terminal progress for an effect, if it deserves one.
fn progress_line(effect: &Effect) -> Option<String> {
    match effect {
        Effect::StageOutput { step, content, .. } => {
            let summary = match content {
                serde_json::Value::String(text) => first_line(text),
                other => match other.get("loop").and_then(|v| v.as_bool()) {
                    Some(true) => "loop again".to_string(),
                    Some(false) => "proceed to yield".to_string(),
                    None => first_line(&other.to_string()),
                },
            };
            Some(format!("  [{}/6] {step:<11} {summary}", step.number()))
        }
        Effect::RetrievalResult { items, .. } => {
            Some(format!("        retrieved {} prior item(s)", items.len()))
        }
        Effect::Error { step, kind, message } => {
            Some(format!("  ⚠️  {step}: {kind} — {message}"))
        }
        Effect::PersistMessage { .. } | Effect::TerminalResponse { .. } => None,
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 72 {
        let cut: String = line.chars().take(71).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
