//! Line-oriented terminal client.
//!
//! Reads `PARLEY_*` settings from the environment, logs in with
//! `PARLEY_TOKEN`/`PARLEY_USER_ID` and then accepts commands on stdin:
//!
//! ```text
//! list             show chats, unread ones marked with *
//! open <chat-id>   open a chat
//! chat <user-id>   open (or start) the chat with a user
//! send <text>      send to the open chat
//! close            close the open chat
//! count            show the unread badge
//! name <username>  change the display name
//! quit
//! ```

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use parley_client::api::ChatBackend;
use parley_client::controller::OpenChat;
use parley_client::session::LiveController;
use parley_client::{ClientConfig, Session};
use parley_shared::api::ProfileUpdate;
use parley_shared::{ChatId, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = ClientConfig::from_env();
    tracing::debug!(?config, "Loaded configuration");

    let token = config
        .token
        .clone()
        .context("PARLEY_TOKEN must be set")?;
    let user = config
        .user_id
        .clone()
        .context("PARLEY_USER_ID must be set")?;

    let mut session = Session::new(&config)?;
    let logged_in = session.login(&token, user.clone()).await?;
    let mut controller = logged_in.controller;
    let mut events = logged_in.events;
    let mut badge = session.counter().subscribe();

    println!("Signed in as {user}. Unread chats: {}", session.counter().get());
    print_list(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&mut controller, line.trim()).await {
                    break;
                }
            }
            Some(event) = events.recv() => {
                controller.on_server_event(event).await;
                if let Some(open) = controller.open_chat() {
                    if let Some(last) = open.messages.last() {
                        println!("[{}] {}: {}", open.chat.id, last.sender_ref, last.text);
                    }
                }
                if let Some(err) = controller.take_error() {
                    println!("! {err}");
                }
            }
            Ok(()) = badge.changed() => {
                println!("Unread chats: {}", *badge.borrow_and_update());
            }
        }
    }

    session.logout().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn run_command(controller: &mut LiveController, line: &str) -> bool {
    let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();

    let result: anyhow::Result<()> = async {
        match cmd {
            "" => {}
            "quit" | "exit" => return Ok(()),
            "list" => {
                controller.refresh_list().await?;
                print_list(controller);
            }
            "open" => {
                let id = ChatId::parse(arg).context("expected a chat id")?;
                controller.open(id).await?;
                print_open(controller);
            }
            "chat" => {
                controller.start_chat(&UserId::new(arg)).await?;
                print_open(controller);
            }
            "send" => {
                controller.set_draft(arg);
                let message = controller.send().await?;
                println!("sent {}", message.id);
            }
            "close" => controller.close(),
            "count" => println!("Unread chats: {}", controller.counter().get()),
            "name" => {
                let profile = controller
                    .backend()
                    .update_profile(&ProfileUpdate {
                        username: Some(arg.to_string()),
                        avatar: None,
                    })
                    .await?;
                println!("Display name is now {}", profile.username.unwrap_or_default());
            }
            other => println!("unknown command: {other}"),
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        println!("! {e}");
    }
    // Already reported through `result`.
    controller.take_error();
    !matches!(cmd, "quit" | "exit")
}

fn print_list(controller: &LiveController) {
    for summary in controller.chats() {
        let mark = if controller.is_unread(summary.chat.id) { "*" } else { " " };
        let name = summary
            .receiver
            .as_ref()
            .and_then(|r| r.username.clone())
            .unwrap_or_else(|| "(unknown)".into());
        println!(
            "{mark} {} {name}: {}",
            summary.chat.id,
            summary.chat.last_message.as_deref().unwrap_or("")
        );
    }
}

fn print_open(controller: &LiveController) {
    if let Some(open) = controller.open_chat() {
        for line in thread_lines(open) {
            println!("{line}");
        }
    }
}

fn thread_lines(open: &OpenChat) -> Vec<String> {
    if open.messages.is_empty() {
        return vec!["  No messages yet".to_string()];
    }
    open.messages
        .iter()
        .map(|m| format!("  {}: {}", m.sender_ref, m.text))
        .collect()
}
