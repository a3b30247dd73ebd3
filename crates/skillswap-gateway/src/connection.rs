use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use skillswap_types::api::Claims;
use skillswap_types::events::{ChatCommand, ChatEvent};

use crate::chat::{ChatAccess, ChatContext, log_chat_error};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket gets to present its Identify token.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection. The client must open with an
/// Identify command carrying its JWT; after that it can join any exchange
/// thread it participates in and exchange chat commands for events.
pub async fn handle_connection(socket: WebSocket, chat: ChatContext, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to chat gateway", name, user_id);

    // All events for this client funnel through one channel: the forwarder
    // task of each joined exchange pushes here, and direct replies (like
    // JoinedExchange acks) are pushed by the command handler itself.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ChatEvent>();

    // One forwarder task per joined exchange. Re-joining replaces the task.
    let joined: Arc<tokio::sync::Mutex<HashMap<i64, JoinHandle<()>>>> =
        Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward events -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!("failed to serialize chat event: {err}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client.
    let name_recv = name.clone();
    let joined_recv = joined.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChatCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&chat, user_id, &name_recv, cmd, &event_tx, &joined_recv)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            frame_preview(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    for (_, handle) in joined.lock().await.drain() {
        handle.abort();
    }
    info!("{} ({}) disconnected from chat gateway", name, user_id);
}

/// Log-safe prefix of a raw frame. Truncation backs off to a char boundary
/// so a multibyte character straddling the cutoff never panics the slice.
fn frame_preview(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(i64, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ChatCommand::Identify { token }) =
                    serde_json::from_str::<ChatCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.name));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    chat: &ChatContext,
    user_id: i64,
    name: &str,
    cmd: ChatCommand,
    event_tx: &mpsc::UnboundedSender<ChatEvent>,
    joined: &Arc<tokio::sync::Mutex<HashMap<i64, JoinHandle<()>>>>,
) {
    match cmd {
        ChatCommand::Identify { .. } => {} // Already handled

        ChatCommand::JoinExchange { exchange_id } => {
            if let Err(err) = chat.authorize(exchange_id, user_id, ChatAccess::Read).await {
                log_chat_error("join", &err);
                return;
            }
            info!("{} ({}) joined exchange thread {}", name, user_id, exchange_id);

            let mut rx = chat.dispatcher.subscribe(exchange_id).await;
            let tx = event_tx.clone();
            let forwarder = tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("chat room {} receiver lagged by {} events", exchange_id, n);
                        }
                        Err(_) => break,
                    }
                }
            });

            if let Some(old) = joined.lock().await.insert(exchange_id, forwarder) {
                old.abort();
            }
            let _ = event_tx.send(ChatEvent::JoinedExchange { exchange_id });
        }

        ChatCommand::Typing { exchange_id, is_typing } => {
            // Only relayed for threads the client actually joined.
            if joined.lock().await.contains_key(&exchange_id) {
                chat.typing(exchange_id, user_id, is_typing).await;
            }
        }

        ChatCommand::SendMessage { exchange_id, body } => {
            // Delivery happens via the room broadcast; nothing to reply here.
            if let Err(err) = chat.send(exchange_id, user_id, &body, None).await {
                log_chat_error("send", &err);
            }
        }

        ChatCommand::MarkRead { exchange_id } => {
            if let Err(err) = chat.mark_read(exchange_id, user_id).await {
                log_chat_error("mark_read", &err);
            }
        }
    }
}
