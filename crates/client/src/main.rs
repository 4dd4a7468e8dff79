//! Murmur terminal client.
//!
//! Lines typed on stdin are sent to the current conversation. Commands:
//! `/join <id>`, `/leave <id>`, `/open <id>`, `/read`, `/react <message> <emoji>`,
//! `/retry <pending>`, `/away`, `/back`, `/history`, `/quit`. With
//! `MURMUR_HISTORY_URL` set, `/read` and `/react` fall back to REST while the
//! socket is down.

use std::sync::Arc;

use anyhow::Context;
use murmur_client::audio::{LogAlert, TerminalBell};
use murmur_client::{
    logging, ClientConfig, ConnectionManager, HistorySource, RestHistory, SessionEvent, WebSocketConnector,
};
use murmur_shared::{Payload, PresenceStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::DEFAULT_FILTER);

    let config = ClientConfig::from_env().context("loading client configuration")?;
    let history = config
        .history_url
        .clone()
        .map(|url| RestHistory::new(url).with_token(config.token.clone()));

    let connector = Arc::new(WebSocketConnector {
        connect_timeout: Some(std::time::Duration::from_secs(15)),
    });
    let manager = ConnectionManager::new(config, connector);
    manager.add_notification_sink(Arc::new(TerminalBell));
    manager.add_notification_sink(Arc::new(LogAlert::default()));

    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Envelope(envelope)) => {
                    if let Payload::Message(message) = &envelope.payload {
                        println!(
                            "[{}] {}: {}",
                            envelope.conversation_id.as_deref().unwrap_or("?"),
                            message.sender_id.as_deref().unwrap_or("?"),
                            message.content
                        );
                    }
                }
                Ok(SessionEvent::Connected) => println!("* connected"),
                Ok(SessionEvent::Disconnected { will_reconnect }) => {
                    println!("* disconnected (reconnect: {will_reconnect})")
                }
                Ok(SessionEvent::Error(e)) => println!("* error: {e}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event consumer lagging")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    manager.connect();

    if let Some(source) = &history {
        match source.list_conversations().await {
            Ok(conversations) => {
                for conversation in conversations {
                    println!(
                        "* {} {} ({} members)",
                        conversation.id,
                        conversation.title.as_deref().unwrap_or(""),
                        conversation.participant_ids.len()
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not list conversations"),
        }
    }

    let commands = manager.commands();
    let mut current: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let accepted = match (words.next(), words.next(), words.next()) {
            (None, ..) => continue,
            (Some("/quit"), ..) => break,
            (Some("/join"), Some(id), _) => {
                current = Some(id.to_string());
                manager.set_focus(current.clone());
                commands.join_conversation(id)
            }
            (Some("/leave"), Some(id), _) => {
                if current.as_deref() == Some(id) {
                    current = None;
                    manager.set_focus(None);
                }
                commands.leave_conversation(id)
            }
            (Some("/open"), Some(id), _) => {
                current = Some(id.to_string());
                manager.set_focus(current.clone());
                true
            }
            (Some("/away"), ..) => commands.set_presence(PresenceStatus::Away),
            (Some("/back"), ..) => commands.set_presence(PresenceStatus::Online),
            (Some(word), ..) if word.starts_with('/') => {
                let Some(id) = current.clone() else {
                    println!("* no conversation open");
                    continue;
                };
                match (word, line.split_whitespace().nth(1), line.split_whitespace().nth(2)) {
                    ("/read", ..) => {
                        let unread = manager.unread_ids(&id);
                        if unread.is_empty() {
                            continue;
                        }
                        if commands.mark_message_read(&id, unread.clone()) {
                            true
                        } else if let Some(source) = &history {
                            report(manager.mark_read_fallback(source, &id, unread).await)
                        } else {
                            false
                        }
                    }
                    ("/react", Some(message_id), Some(emoji)) => {
                        if commands.add_reaction(&id, message_id, emoji) {
                            true
                        } else if let Some(source) = &history {
                            report(
                                manager
                                    .add_reaction_fallback(source, &id, message_id, emoji)
                                    .await,
                            )
                        } else {
                            false
                        }
                    }
                    ("/retry", Some(pending_id), _) => commands.retry_message(&id, pending_id),
                    ("/history", ..) => match &history {
                        Some(source) => match manager.load_history(source, &id).await {
                            Ok(added) => {
                                println!("* loaded {added} older messages");
                                true
                            }
                            Err(e) => {
                                println!("* history failed: {e}");
                                false
                            }
                        },
                        None => {
                            println!("* MURMUR_HISTORY_URL is not set");
                            false
                        }
                    },
                    _ => {
                        println!("* unknown command {word}");
                        continue;
                    }
                }
            }
            (Some(_), ..) => match &current {
                Some(id) => commands.send_chat_message(id, line).is_some(),
                None => {
                    println!("* no conversation open; try /join <id>");
                    continue;
                }
            },
        };
        if !accepted {
            println!("* not sent ({:?})", manager.state());
        }
    }

    manager.dispose().await;
    Ok(())
}

/// Print a failed REST fallback; true when it went through.
fn report(result: Result<(), murmur_shared::ApiError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            println!("* rest fallback failed: {e}");
            false
        }
    }
}
