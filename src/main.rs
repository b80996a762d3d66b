//! Demo daemon: runs the behavior engine against the real desktop and reads
//! commands from stdin.
//!
//! ```text
//! /focus /hangout /quiet   change the primary setting
//! /lock                    toggle focus lock
//! /status                  print mode and initiative state
//! /greet                   try a session-start message
//! /quit                    exit
//! anything else            treated as a chat message from the user
//! ```

use anyhow::Result;
use kokoro_behavior::config::default_data_dir;
use kokoro_behavior::{
    init_logging, BehaviorConfig, BehaviorEngine, JsonFileStore, ProactiveTrigger, SystemSampler,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let data_dir = default_data_dir();
    let config_path = data_dir.join("behavior_config.json");
    let config = BehaviorConfig::load(&config_path);
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            tracing::warn!("[Config] Could not write defaults: {}", e);
        }
    }

    let engine = BehaviorEngine::builder(config)
        .sampler(SystemSampler::new())
        .store(JsonFileStore::new(&data_dir))
        .start();
    tracing::info!(
        "[Main] kokoro-behavior {} started, data in {}",
        kokoro_behavior::VERSION,
        data_dir.display()
    );

    let mode_task = engine.on_mode_update(|state| {
        println!("~ mode: {} ({})", state.effective, state.reason);
    });
    let proactive_task = engine.on_proactive_message(|message| {
        println!("> [{}] {}", message.category.as_str(), message.text);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&engine, line.trim()).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown().await;
    mode_task.abort();
    proactive_task.abort();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(engine: &BehaviorEngine, line: &str) -> Result<bool> {
    match line {
        "" => engine.report_activity(),
        "/quit" | "/exit" => return Ok(false),
        "/lock" => {
            let state = engine.toggle_focus_lock().await;
            println!("focus lock: {}", state.focus_locked);
        }
        "/status" => {
            println!("{}", serde_json::to_string_pretty(&engine.mode_state())?);
            println!("{}", serde_json::to_string_pretty(&engine.initiative_state())?);
        }
        "/greet" => {
            if engine
                .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
                .await
                .is_none()
            {
                println!("(stays quiet)");
            }
        }
        command if command.starts_with('/') => {
            let state = engine.set_primary_named(&command[1..]).await;
            println!("primary: {}", state.primary.as_str());
        }
        text => engine.report_user_sent(text),
    }
    Ok(true)
}
