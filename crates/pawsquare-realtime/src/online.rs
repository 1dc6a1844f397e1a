use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use pawsquare_types::events::{GLOBAL_PRESENCE_CHANNEL, PresenceEntry};

use crate::hub::{PresenceEvent, PresenceHandle, PresenceHub};

/// App-wide online tracking over the shared `global-presence` channel.
/// Every client announces only its own id; the online set is recomputed from
/// the full synced key set on every sync event.
pub struct OnlineTracker {
    online: Arc<RwLock<HashSet<Uuid>>>,
    handle: PresenceHandle,
    sync_task: JoinHandle<()>,
}

impl OnlineTracker {
    pub async fn open(hub: &PresenceHub, self_user_id: Uuid) -> Self {
        let (handle, rx) = hub
            .join(GLOBAL_PRESENCE_CHANNEL, &self_user_id.to_string())
            .await;

        handle
            .track(PresenceEntry {
                user_id: self_user_id,
                is_typing: false,
                last_seen_at: Utc::now(),
            })
            .await;

        let online: Arc<RwLock<HashSet<Uuid>>> = Arc::new(RwLock::new(HashSet::new()));
        let sync_task = tokio::spawn(run_sync_loop(rx, online.clone()));

        Self {
            online,
            handle,
            sync_task,
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online
            .read()
            .expect("online set lock poisoned")
            .contains(&user_id)
    }

    /// Intersect the synced online set with an arbitrary watch-list.
    pub fn online_among(&self, user_ids: &[Uuid]) -> Vec<Uuid> {
        let online = self.online.read().expect("online set lock poisoned");
        user_ids
            .iter()
            .copied()
            .filter(|id| online.contains(id))
            .collect()
    }

    pub async fn close(self) {
        self.sync_task.abort();
        self.handle.leave().await;
    }
}

async fn run_sync_loop(
    mut rx: broadcast::Receiver<PresenceEvent>,
    online: Arc<RwLock<HashSet<Uuid>>>,
) {
    loop {
        match rx.recv().await {
            Ok(PresenceEvent::Sync { state }) => {
                let next: HashSet<Uuid> = state
                    .keys()
                    .filter_map(|key| key.parse().ok())
                    .collect();
                *online.write().expect("online set lock poisoned") = next;
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_watch_list_across_join_and_leave() {
        let hub = PresenceHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();

        let alice_view = OnlineTracker::open(&hub, alice).await;
        let bob_view = OnlineTracker::open(&hub, bob).await;
        settle().await;

        assert!(alice_view.is_online(bob));
        assert!(bob_view.is_online(alice));
        assert!(!alice_view.is_online(carol));
        assert_eq!(alice_view.online_among(&[bob, carol]), vec![bob]);

        bob_view.close().await;
        settle().await;
        assert!(!alice_view.is_online(bob));
        alice_view.close().await;
    }
}
