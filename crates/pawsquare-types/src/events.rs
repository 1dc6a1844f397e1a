use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::NotificationKind;

/// Fixed channel every client joins for app-wide online tracking.
pub const GLOBAL_PRESENCE_CHANNEL: &str = "global-presence";

/// Name of the per-conversation presence channel.
pub fn conversation_channel(conversation_id: Uuid) -> String {
    format!("presence-{conversation_id}")
}

/// State a client announces ("tracks") on a presence channel. Ephemeral:
/// lives only while the owning subscription is alive, last write wins per
/// (channel, client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub is_typing: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// Full channel state as delivered by a sync event: key (the participant's
/// user id) to the entries tracked under that key, most recent last.
pub type PresenceStateMap = BTreeMap<String, Vec<PresenceEntry>>;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Full presence state for a channel, emitted after every membership
    /// or tracked-state change
    PresenceSync {
        channel: String,
        state: PresenceStateMap,
    },

    /// A participant announced itself on a channel
    PresenceJoin {
        channel: String,
        key: String,
        entries: Vec<PresenceEntry>,
    },

    /// A participant left a channel (unsubscribe or disconnect)
    PresenceLeave {
        channel: String,
        key: String,
        entries: Vec<PresenceEntry>,
    },

    /// A direct message was posted in a conversation the client participates in
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// A notification was created for this client
    NotificationCreate {
        id: Uuid,
        kind: NotificationKind,
        actor_id: Uuid,
        actor_username: String,
        post_id: Option<Uuid>,
        created_at: DateTime<Utc>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Join a presence channel, keyed by the caller's own user id
    PresenceJoin { channel: String },

    /// Announce/replace this client's tracked state on a joined channel
    PresenceTrack { channel: String, is_typing: bool },

    /// Leave a presence channel
    PresenceLeave { channel: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        let id = Uuid::nil();
        assert_eq!(
            conversation_channel(id),
            "presence-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(GLOBAL_PRESENCE_CHANNEL, "global-presence");
    }

    #[test]
    fn command_wire_format() {
        let cmd: RealtimeCommand =
            serde_json::from_str(r#"{"type":"PresenceTrack","data":{"channel":"presence-x","is_typing":true}}"#)
                .unwrap();
        match cmd {
            RealtimeCommand::PresenceTrack { channel, is_typing } => {
                assert_eq!(channel, "presence-x");
                assert!(is_typing);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
