use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use pawsquare_types::events::{PresenceEntry, PresenceStateMap, RealtimeEvent};

/// Events delivered to subscribers of a presence channel, in hub emission
/// order. Every tracked-state or membership change emits a `Sync` with the
/// full channel state first, then the `Join`/`Leave` diff for the change.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    Sync { state: PresenceStateMap },
    Join { key: String, entries: Vec<PresenceEntry> },
    Leave { key: String, entries: Vec<PresenceEntry> },
}

/// In-process pub/sub service with presence semantics: named channels where
/// each client tracks a keyed state entry. Clients only ever write under
/// their own key, so there is no cross-client write contention by
/// construction.
#[derive(Clone)]
pub struct PresenceHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    channels: RwLock<HashMap<String, Channel>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<RealtimeEvent>)>>,
}

struct Channel {
    tx: broadcast::Sender<PresenceEvent>,

    /// key -> entries tracked under that key, one per client, most recent last
    entries: HashMap<String, Vec<(Uuid, PresenceEntry)>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            entries: HashMap::new(),
        }
    }

    fn snapshot(&self) -> PresenceStateMap {
        self.entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(key, entries)| {
                (
                    key.clone(),
                    entries.iter().map(|(_, e)| e.clone()).collect(),
                )
            })
            .collect()
    }
}

/// Capability to announce state on (and leave) a joined channel.
#[derive(Clone)]
pub struct PresenceHandle {
    hub: PresenceHub,
    channel: String,
    key: String,
    client_id: Uuid,
}

impl PresenceHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Announce/replace this client's entry under its key. Last write wins
    /// per (channel, client); re-tracking moves the entry to the back so the
    /// most recent announcement is always last.
    pub async fn track(&self, entry: PresenceEntry) {
        self.hub
            .track(&self.channel, &self.key, self.client_id, entry)
            .await;
    }

    /// Remove this client's entry and notify the channel.
    pub async fn leave(&self) {
        self.hub.leave(&self.channel, &self.key, self.client_id).await;
    }
}

impl PresenceHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Join a channel keyed by the caller's own identifier. The receiver
    /// starts with a `Sync` of the current channel state.
    pub async fn join(
        &self,
        channel: &str,
        key: &str,
    ) -> (PresenceHandle, broadcast::Receiver<PresenceEvent>) {
        let mut channels = self.inner.channels.write().await;
        let ch = channels
            .entry(channel.to_string())
            .or_insert_with(Channel::new);
        let rx = ch.tx.subscribe();

        // Initial sync so the joiner sees who is already here. Delivered to
        // every subscriber; recomputing from a snapshot is idempotent.
        let _ = ch.tx.send(PresenceEvent::Sync {
            state: ch.snapshot(),
        });

        let handle = PresenceHandle {
            hub: self.clone(),
            channel: channel.to_string(),
            key: key.to_string(),
            client_id: Uuid::new_v4(),
        };
        (handle, rx)
    }

    async fn track(&self, channel: &str, key: &str, client_id: Uuid, entry: PresenceEntry) {
        let mut channels = self.inner.channels.write().await;
        let Some(ch) = channels.get_mut(channel) else {
            return;
        };

        let entries = ch.entries.entry(key.to_string()).or_default();
        entries.retain(|(cid, _)| *cid != client_id);
        entries.push((client_id, entry.clone()));

        let _ = ch.tx.send(PresenceEvent::Sync {
            state: ch.snapshot(),
        });
        let _ = ch.tx.send(PresenceEvent::Join {
            key: key.to_string(),
            entries: vec![entry],
        });
    }

    async fn leave(&self, channel: &str, key: &str, client_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        let Some(ch) = channels.get_mut(channel) else {
            return;
        };

        let mut removed = Vec::new();
        if let Some(entries) = ch.entries.get_mut(key) {
            if let Some(pos) = entries.iter().position(|(cid, _)| *cid == client_id) {
                removed.push(entries.remove(pos).1);
            }
            if entries.is_empty() {
                ch.entries.remove(key);
            }
        }

        if removed.is_empty() {
            return;
        }

        let _ = ch.tx.send(PresenceEvent::Sync {
            state: ch.snapshot(),
        });
        let _ = ch.tx.send(PresenceEvent::Leave {
            key: key.to_string(),
            entries: removed,
        });

        // Channel dies with its last tracked entry; any remaining observers
        // see their receivers close.
        if ch.entries.is_empty() {
            channels.remove(channel);
        }
    }

    // -- Targeted per-user delivery (direct messages, notifications) --

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches —
    /// a newer connection may have taken the slot over.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: RealtimeEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(user_id: Uuid, is_typing: bool) -> PresenceEntry {
        PresenceEntry {
            user_id,
            is_typing,
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn retrack_replaces_own_entry() {
        let hub = PresenceHub::new();
        let user = Uuid::new_v4();
        let key = user.to_string();
        let (handle, mut rx) = hub.join("presence-test", &key).await;

        handle.track(entry(user, false)).await;
        handle.track(entry(user, true)).await;

        // The sync that precedes the second Join carries a single entry.
        let mut last_state = None;
        loop {
            match rx.recv().await.unwrap() {
                PresenceEvent::Sync { state } => last_state = Some(state),
                PresenceEvent::Join { entries, .. } if entries[0].is_typing => break,
                _ => continue,
            }
        }
        let entries = &last_state.unwrap()[&key];
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_typing);
    }

    #[tokio::test]
    async fn two_clients_same_key_keeps_most_recent_last() {
        let hub = PresenceHub::new();
        let user = Uuid::new_v4();
        let key = user.to_string();
        let (first, _rx1) = hub.join("presence-test", &key).await;
        let (second, mut rx2) = hub.join("presence-test", &key).await;

        first.track(entry(user, false)).await;
        second.track(entry(user, true)).await;

        let mut last_state = None;
        loop {
            match rx2.recv().await.unwrap() {
                PresenceEvent::Sync { state } => last_state = Some(state),
                PresenceEvent::Join { entries, .. } if entries[0].is_typing => break,
                _ => continue,
            }
        }
        let entries = &last_state.unwrap()[&key];
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_typing);
        assert!(entries[1].is_typing);
    }

    #[tokio::test]
    async fn leave_emits_sync_then_departed_entries() {
        let hub = PresenceHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (alice_handle, _arx) = hub.join("presence-test", &alice.to_string()).await;
        let (bob_handle, mut brx) = hub.join("presence-test", &bob.to_string()).await;
        alice_handle.track(entry(alice, true)).await;
        bob_handle.track(entry(bob, false)).await;

        alice_handle.leave().await;

        let mut last_state = None;
        loop {
            match brx.recv().await.unwrap() {
                PresenceEvent::Sync { state } => last_state = Some(state),
                PresenceEvent::Leave { key, entries } => {
                    assert_eq!(key, alice.to_string());
                    assert_eq!(entries.len(), 1);
                    assert!(entries[0].is_typing);
                    break;
                }
                _ => continue,
            }
        }

        // The sync preceding the leave no longer lists alice.
        let state = last_state.unwrap();
        assert!(!state.contains_key(&alice.to_string()));
        assert!(state.contains_key(&bob.to_string()));
    }

    #[tokio::test]
    async fn targeted_channel_is_guarded_by_conn_id() {
        let hub = PresenceHub::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = hub.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = hub.register_user_channel(user).await;

        // The old connection's teardown must not evict the new one.
        hub.unregister_user_channel(user, old_conn).await;

        hub.send_to_user(
            user,
            RealtimeEvent::Ready {
                user_id: user,
                username: "alice".into(),
            },
        )
        .await;
        assert!(matches!(
            new_rx.recv().await,
            Some(RealtimeEvent::Ready { .. })
        ));
    }
}
