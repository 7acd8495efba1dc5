//! Tripdesk 命令行前端
//!
//! 入口：初始化日志、打开旅行数据库、构建运行时，然后逐行读取用户输入。
//! 命令：/approve、/deny [理由]、/modify {json}、/state、/quit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tripdesk::config::load_config;
use tripdesk::core::{ConversationState, Dispatcher, InboundTurn, OutboundTurn, TurnEvent};
use tripdesk::observability;
use tripdesk::travel::{build_runtime, open_store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let store = open_store(&config).context("Failed to open travel store")?;
    let runtime = build_runtime(config, &store).context("Failed to build runtime")?;
    let dispatcher = Dispatcher::new(Arc::new(runtime));
    let mut state = dispatcher.new_conversation("cli");

    println!("Tripdesk travel assistant. Type /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let scope = dispatcher
            .runtime()
            .scopes
            .get(state.stack.active_scope())
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        stdout.write_all(format!("[{scope}] > ").as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let inbound = match parse_command(line, &state) {
            Command::Quit => break,
            Command::State => {
                let snapshot = state.snapshot(&dispatcher.runtime().scopes)?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                continue;
            }
            Command::Invalid(msg) => {
                println!("{msg}");
                continue;
            }
            Command::Send(inbound) => inbound,
        };

        match dispatcher.handle_turn(&mut state, inbound).await {
            Ok(out) => print_outbound(&out),
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                println!("Sorry, this conversation can't continue: {e}");
            }
        }
    }
    Ok(())
}

enum Command {
    Send(InboundTurn),
    State,
    Quit,
    Invalid(String),
}

fn parse_command(line: &str, state: &ConversationState) -> Command {
    let token = state.gate.pending().map(|p| p.token);
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "/quit" | "/exit" => Command::Quit,
        "/state" => Command::State,
        "/approve" => Command::Send(InboundTurn::approve(token)),
        "/deny" => Command::Send(InboundTurn::deny(token, (!rest.is_empty()).then_some(rest))),
        "/modify" => match serde_json::from_str(rest) {
            Ok(args) => Command::Send(InboundTurn::modify(token, args)),
            Err(e) => Command::Invalid(format!("/modify expects a JSON object: {e}")),
        },
        _ => Command::Send(InboundTurn::message(line)),
    }
}

fn print_outbound(out: &OutboundTurn) {
    for event in &out.events {
        match event {
            TurnEvent::Delegated { from, to } => println!("  ({from} -> {to})"),
            TurnEvent::Completed { from, to, .. } | TurnEvent::Escalated { from, to, .. } => {
                println!("  ({from} -> {to})")
            }
            _ => {}
        }
    }
    if !out.text.is_empty() {
        println!("{}", out.text);
    }
    if let Some(prompt) = &out.confirmation {
        println!("  [/approve, /deny <reason>, /modify {{...}}] token {}", prompt.token);
    }
}
