use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parley_chat::{ChatError, ChatResult, ConnectionId, Identity};
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::GatewayState;

/// Serve one socket: identify handshake, then the event loop until either side
/// goes away. The connection leaves every room it joined on exit.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match wait_for_identify(&mut receiver, &state).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!("Socket failed to identify ({}), closing", err.kind());
            let _ = send_event(&mut sender, &error_event(&err)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", identity.username, identity.id);

    run_connection_loop(sender, receiver, state, identity).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: GatewayState,
    identity: Identity,
) {
    let (conn_id, mut events_rx) = state.fanout.register();

    let ready = GatewayEvent::Ready {
        user_id: identity.id,
        username: identity.username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        state.fanout.disconnect(conn_id);
        return;
    }

    let heartbeat_interval = state.timings.heartbeat_interval;
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events and direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
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
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Handled one at a time so a connection's own
    // sends are appended in the order it issued them.
    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_state, conn_id, &recv_identity, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_identity.username,
                            recv_identity.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let err = ChatError::Validation(format!("malformed command: {}", e));
                        recv_state.fanout.send_to(conn_id, error_event(&err));
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

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.fanout.disconnect(conn_id);
    info!("{} ({}) disconnected from gateway", identity.username, identity.id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    state: &GatewayState,
) -> ChatResult<Identity> {
    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    return match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(GatewayCommand::Identify { token }) => state.gate.verify(Some(&token)),
                        // Anything before identify is refused
                        _ => Err(ChatError::Unauthorized),
                    };
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(ChatError::Unauthorized)
    };

    tokio::time::timeout(state.timings.identify_timeout, handshake)
        .await
        .unwrap_or(Err(ChatError::Unauthorized))
}

async fn handle_command(
    state: &GatewayState,
    conn_id: ConnectionId,
    identity: &Identity,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinRoom { conversation_id } => {
            match state
                .conversations
                .require_participant(conversation_id, identity.id)
                .await
            {
                Ok(()) => {
                    if state.fanout.join(conn_id, conversation_id) {
                        info!(
                            "{} ({}) joined room {}",
                            identity.username, identity.id, conversation_id
                        );
                    }
                    state
                        .fanout
                        .send_to(conn_id, GatewayEvent::RoomJoined { conversation_id });
                }
                Err(err) => reject(state, conn_id, identity, "join-room", err),
            }
        }

        GatewayCommand::SendMessage {
            room_id,
            content,
            file_url,
        } => {
            // Persist and publish in one step; the room (sender included) gets
            // new-message from the message service
            match state
                .messages
                .append_message(room_id, identity, &content, file_url.as_deref())
                .await
            {
                Ok(message) => debug!(
                    "{} ({}) sent {} over the gateway",
                    identity.username, identity.id, message.id
                ),
                Err(err) => reject(state, conn_id, identity, "send-message", err),
            }
        }
    }
}

fn reject(
    state: &GatewayState,
    conn_id: ConnectionId,
    identity: &Identity,
    command: &str,
    err: ChatError,
) {
    if let ChatError::Internal(e) = &err {
        error!("{} from {} failed: {:#}", command, identity.username, e);
    } else {
        warn!("{} from {} rejected: {}", command, identity.username, err);
    }
    state.fanout.send_to(conn_id, error_event(&err));
}

fn error_event(err: &ChatError) -> GatewayEvent {
    GatewayEvent::Error {
        kind: err.kind().to_string(),
        message: err.public_message(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
