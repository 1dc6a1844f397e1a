use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use pawsquare_types::events::{PresenceEntry, RealtimeCommand, RealtimeEvent};

use crate::hub::{PresenceEvent, PresenceHandle, PresenceHub};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Channels this connection has joined, with the task forwarding each
/// channel's events to the socket.
type JoinedChannels = Arc<Mutex<HashMap<String, (PresenceHandle, JoinHandle<()>)>>>;

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so we go straight to Ready and the
/// event loop.
pub async fn handle_connection(
    socket: WebSocket,
    hub: PresenceHub,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = RealtimeEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Targeted channel for direct messages and notifications
    let (conn_id, mut user_rx) = hub.register_user_channel(user_id).await;

    // Outbound funnel: presence forwarders feed this, one task writes the socket
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    let joined: JoinedChannels = Arc::new(Mutex::new(HashMap::new()));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = out_rx.recv() => {
                    let Some(event) = result else { break };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    let text = serde_json::to_string(&event).unwrap();
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

    let hub_recv = hub.clone();
    let username_recv = username.clone();
    let joined_recv = joined.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&hub_recv, user_id, cmd, &joined_recv, &out_tx).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
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

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Leave every joined channel so peers see us depart
    for (_, (handle, forward)) in joined.lock().await.drain() {
        forward.abort();
        handle.leave().await;
    }
    hub.unregister_user_channel(user_id, conn_id).await;

    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn handle_command(
    hub: &PresenceHub,
    user_id: Uuid,
    cmd: RealtimeCommand,
    joined: &JoinedChannels,
    out_tx: &mpsc::UnboundedSender<RealtimeEvent>,
) {
    match cmd {
        RealtimeCommand::PresenceJoin { channel } => {
            let mut joined = joined.lock().await;
            if joined.contains_key(&channel) {
                return;
            }
            let (handle, rx) = hub.join(&channel, &user_id.to_string()).await;
            let forward = tokio::spawn(forward_presence(rx, channel.clone(), out_tx.clone()));
            joined.insert(channel, (handle, forward));
        }

        RealtimeCommand::PresenceTrack { channel, is_typing } => {
            let joined = joined.lock().await;
            if let Some((handle, _)) = joined.get(&channel) {
                handle
                    .track(PresenceEntry {
                        user_id,
                        is_typing,
                        last_seen_at: Utc::now(),
                    })
                    .await;
            }
        }

        RealtimeCommand::PresenceLeave { channel } => {
            let removed = joined.lock().await.remove(&channel);
            if let Some((handle, forward)) = removed {
                forward.abort();
                handle.leave().await;
            }
        }
    }
}

/// Relay one channel's presence events to the connection's outbound funnel.
async fn forward_presence(
    mut rx: broadcast::Receiver<PresenceEvent>,
    channel: String,
    out_tx: mpsc::UnboundedSender<RealtimeEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Presence receiver for {} lagged by {} events", channel, n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let event = match event {
            PresenceEvent::Sync { state } => RealtimeEvent::PresenceSync {
                channel: channel.clone(),
                state,
            },
            PresenceEvent::Join { key, entries } => RealtimeEvent::PresenceJoin {
                channel: channel.clone(),
                key,
                entries,
            },
            PresenceEvent::Leave { key, entries } => RealtimeEvent::PresenceLeave {
                channel: channel.clone(),
                key,
                entries,
            },
        };

        if out_tx.send(event).is_err() {
            break;
        }
    }
}
