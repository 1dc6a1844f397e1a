use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use pawsquare_types::events::{PresenceEntry, conversation_channel};

use crate::hub::{PresenceEvent, PresenceHandle, PresenceHub};

/// Typing announcements auto-reset after this much inactivity.
const TYPING_RESET: Duration = Duration::from_secs(3);

/// The observed side of a two-party conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPresence {
    pub is_online: bool,
    pub is_typing: bool,
}

/// Live view of the other party of a conversation: online state and typing
/// indicator, with automatic staleness correction.
///
/// Channel failures are silent — the view simply never leaves `None`.
pub struct ConversationPresence {
    self_id: Uuid,
    handle: PresenceHandle,
    view: Arc<Mutex<Option<PeerPresence>>>,
    typing_reset: Mutex<Option<JoinHandle<()>>>,
    event_task: JoinHandle<()>,
}

impl ConversationPresence {
    /// Join the conversation's presence channel keyed by our own user id and
    /// announce ourselves as present and not typing.
    pub async fn open(hub: &PresenceHub, conversation_id: Uuid, self_user_id: Uuid) -> Self {
        let channel = conversation_channel(conversation_id);
        let self_key = self_user_id.to_string();
        let (handle, rx) = hub.join(&channel, &self_key).await;

        handle
            .track(PresenceEntry {
                user_id: self_user_id,
                is_typing: false,
                last_seen_at: Utc::now(),
            })
            .await;

        let view: Arc<Mutex<Option<PeerPresence>>> = Arc::new(Mutex::new(None));
        let event_task = tokio::spawn(run_event_loop(rx, self_key, view.clone()));

        Self {
            self_id: self_user_id,
            handle,
            view,
            typing_reset: Mutex::new(None),
            event_task,
        }
    }

    /// `None` before any peer data has arrived.
    pub fn observe(&self) -> Option<PeerPresence> {
        *self.view.lock().expect("presence view lock poisoned")
    }

    /// Announce our typing state. `true` arms a 3-second inactivity timer
    /// that re-announces `false` unless refreshed; at most one timer is live.
    pub async fn set_typing(&self, is_typing: bool) {
        self.announce(is_typing).await;

        let mut pending = self.typing_reset.lock().expect("typing timer lock poisoned");
        if let Some(timer) = pending.take() {
            timer.abort();
        }
        if is_typing {
            let handle = self.handle.clone();
            let user_id = self.self_id;
            *pending = Some(tokio::spawn(async move {
                tokio::time::sleep(TYPING_RESET).await;
                handle
                    .track(PresenceEntry {
                        user_id,
                        is_typing: false,
                        last_seen_at: Utc::now(),
                    })
                    .await;
            }));
        }
    }

    async fn announce(&self, is_typing: bool) {
        self.handle
            .track(PresenceEntry {
                user_id: self.self_id,
                is_typing,
                last_seen_at: Utc::now(),
            })
            .await;
    }

    /// Leave the channel. Cancels any pending typing reset; no further
    /// announcements are sent.
    pub async fn close(self) {
        if let Some(timer) = self
            .typing_reset
            .lock()
            .expect("typing timer lock poisoned")
            .take()
        {
            timer.abort();
        }
        self.event_task.abort();
        self.handle.leave().await;
    }
}

async fn run_event_loop(
    mut rx: broadcast::Receiver<PresenceEvent>,
    self_key: String,
    view: Arc<Mutex<Option<PeerPresence>>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => apply_event(&self_key, &view, event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn apply_event(self_key: &str, view: &Mutex<Option<PeerPresence>>, event: PresenceEvent) {
    match event {
        // Full recompute: most recently tracked entry of the first non-self
        // participant wins; nobody else present means no view.
        PresenceEvent::Sync { state } => {
            let next = state
                .iter()
                .find(|(key, entries)| key.as_str() != self_key && !entries.is_empty())
                .and_then(|(_, entries)| entries.last())
                .map(|entry| PeerPresence {
                    is_online: true,
                    is_typing: entry.is_typing,
                });
            *view.lock().expect("presence view lock poisoned") = next;
        }

        // Short-circuit of the full sync for lower latency.
        PresenceEvent::Join { key, entries } if key != self_key => {
            if let Some(entry) = entries.last() {
                *view.lock().expect("presence view lock poisoned") = Some(PeerPresence {
                    is_online: true,
                    is_typing: entry.is_typing,
                });
            }
        }

        // The peer's identity is kept, only its liveness flags drop.
        PresenceEvent::Leave { key, .. } if key != self_key => {
            *view.lock().expect("presence view lock poisoned") = Some(PeerPresence {
                is_online: false,
                is_typing: false,
            });
        }

        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawsquare_types::events::conversation_channel;

    /// Let spawned event-loop tasks drain their queues.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn entry(user_id: Uuid, is_typing: bool) -> PresenceEntry {
        PresenceEntry {
            user_id,
            is_typing,
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn view_is_none_until_peer_appears() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let me = ConversationPresence::open(&hub, conversation, Uuid::new_v4()).await;
        settle().await;
        assert_eq!(me.observe(), None);
        me.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sync_takes_last_entry_of_peer_key() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let channel = conversation_channel(conversation);
        let self_id = Uuid::new_v4();
        let peer = Uuid::new_v4();

        let me = ConversationPresence::open(&hub, conversation, self_id).await;

        // The peer tracks from two clients under one key; the most recent
        // entry (typing) must win over the first (not typing).
        let (peer_a, _rx_a) = hub.join(&channel, &peer.to_string()).await;
        let (peer_b, _rx_b) = hub.join(&channel, &peer.to_string()).await;
        peer_a.track(entry(peer, false)).await;
        peer_b.track(entry(peer, true)).await;
        settle().await;

        assert_eq!(
            me.observe(),
            Some(PeerPresence {
                is_online: true,
                is_typing: true
            })
        );
        me.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn leave_forces_offline_and_not_typing() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let channel = conversation_channel(conversation);
        let self_id = Uuid::new_v4();
        let peer = Uuid::new_v4();

        let me = ConversationPresence::open(&hub, conversation, self_id).await;
        let (peer_handle, _rx) = hub.join(&channel, &peer.to_string()).await;
        peer_handle.track(entry(peer, true)).await;
        settle().await;
        assert_eq!(
            me.observe(),
            Some(PeerPresence {
                is_online: true,
                is_typing: true
            })
        );

        peer_handle.leave().await;
        settle().await;
        assert_eq!(
            me.observe(),
            Some(PeerPresence {
                is_online: false,
                is_typing: false
            })
        );
        me.close().await;
    }

    /// Observe the announcements one side makes by joining as the peer.
    async fn typing_announcements(
        rx: &mut broadcast::Receiver<PresenceEvent>,
        key: &str,
    ) -> Vec<bool> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PresenceEvent::Join { key: k, entries } = event {
                if k == key {
                    seen.extend(entries.iter().map(|e| e.is_typing));
                }
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn typing_auto_resets_after_three_seconds() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let channel = conversation_channel(conversation);
        let self_id = Uuid::new_v4();

        let me = ConversationPresence::open(&hub, conversation, self_id).await;
        let (_peer_handle, mut rx) = hub.join(&channel, "peer").await;

        me.set_typing(true).await;
        settle().await;
        let _ = typing_announcements(&mut rx, &self_id.to_string()).await;

        tokio::time::sleep(Duration::from_millis(3100)).await;
        settle().await;

        // Exactly one automatic false announcement.
        let seen = typing_announcements(&mut rx, &self_id.to_string()).await;
        assert_eq!(seen, vec![false]);
        me.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retyping_rearms_a_single_timer() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let channel = conversation_channel(conversation);
        let self_id = Uuid::new_v4();

        let me = ConversationPresence::open(&hub, conversation, self_id).await;
        let (_peer_handle, mut rx) = hub.join(&channel, "peer").await;

        me.set_typing(true).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        me.set_typing(true).await;
        settle().await;
        let _ = typing_announcements(&mut rx, &self_id.to_string()).await;

        // The first timer (due t=3s) was cancelled by the re-type; nothing
        // resets until the second timer fires at t=4s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        settle().await;
        assert!(
            typing_announcements(&mut rx, &self_id.to_string())
                .await
                .is_empty()
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        let seen = typing_announcements(&mut rx, &self_id.to_string()).await;
        assert_eq!(seen, vec![false]);
        me.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_the_pending_reset() {
        let hub = PresenceHub::new();
        let conversation = Uuid::new_v4();
        let channel = conversation_channel(conversation);
        let self_id = Uuid::new_v4();

        let me = ConversationPresence::open(&hub, conversation, self_id).await;
        let (_peer_handle, mut rx) = hub.join(&channel, "peer").await;

        me.set_typing(true).await;
        me.set_typing(false).await;
        settle().await;
        let _ = typing_announcements(&mut rx, &self_id.to_string()).await;

        // The aborted timer never fires a second reset.
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(
            typing_announcements(&mut rx, &self_id.to_string())
                .await
                .is_empty()
        );
        me.close().await;
    }
}
