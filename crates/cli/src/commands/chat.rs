//! `deskpilot chat`: Interactive or single-message chat with the dispatcher.

use std::io::Write;
use std::sync::Arc;

use deskpilot_config::AppConfig;
use deskpilot_core::event::EventBus;
use deskpilot_dispatch::{DispatchEvent, Dispatcher, TurnOutcome, TurnRequest};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    session: Option<String>,
    stream: bool,
    mock_backend: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early and give a clear error
    if let Err(e) = config.require_api_key() {
        eprintln!();
        eprintln!("  ERROR: {e}");
        if let Some(hint) = e.hint() {
            eprintln!("  {hint}");
        }
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let backend = deskpilot_gateway::backend_from_config(&config, mock_backend);
    let dispatcher =
        deskpilot_gateway::build_dispatcher(&config, backend, Arc::new(EventBus::default())).await?;
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::debug!(session_id = %session_id, store = dispatcher.store().name(), "Chat session ready");

    if let Some(msg) = message {
        // Single message mode
        send(&dispatcher, &session_id, &msg, stream).await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  deskpilot — Interactive Mode");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Sessions:  {}", dispatcher.store().name());
    println!("  Session:   {session_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if !line.is_empty() {
            send(&dispatcher, &session_id, line, stream).await;
            println!();
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}

async fn send(dispatcher: &Dispatcher, session_id: &str, utterance: &str, stream: bool) {
    let request = TurnRequest::new(session_id, utterance);

    if stream {
        let mut rx = dispatcher.run_stream(request);
        print!("  Assistant > ");
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Classification {
                    category, confidence, ..
                } => eprintln!("  [intent] {category} ({confidence:.2})"),
                DispatchEvent::ActionStart { name, .. } => eprintln!("  [action] {name} ..."),
                DispatchEvent::ActionEnd {
                    name,
                    success,
                    duration_ms,
                    ..
                } => eprintln!(
                    "  [action] {name} {} in {duration_ms}ms",
                    if success { "ok" } else { "failed" }
                ),
                DispatchEvent::Token { content } => {
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                }
                DispatchEvent::Done(outcome) => {
                    println!();
                    print_footer(&outcome);
                }
                DispatchEvent::Error {
                    error, suggestion, ..
                } => {
                    println!();
                    eprintln!("  [Error] {error}");
                    if let Some(suggestion) = suggestion {
                        eprintln!("  {suggestion}");
                    }
                }
            }
        }
        return;
    }

    eprint!("  ...");
    match dispatcher.run_turn(request).await {
        Ok(outcome) => {
            eprint!("\r     \r");
            for line in outcome.reply.lines() {
                println!("  Assistant > {line}");
            }
            print_footer(&outcome);
        }
        Err(e) => {
            eprint!("\r     \r");
            eprintln!("  [Error] {e}");
            if let Some(hint) = e.remediation() {
                eprintln!("  {hint}");
            }
        }
    }
}

fn print_footer(outcome: &TurnOutcome) {
    let mut notes = vec![format!("intent: {}", outcome.intent_category)];
    if !outcome.action_log.is_empty() {
        notes.push(format!("actions: {}", outcome.action_log.len()));
    }
    if outcome.is_escalated {
        notes.push("escalated".into());
    }
    if !outcome.success {
        notes.push("failed".into());
    }
    eprintln!("  ({})", notes.join(", "));
}
