pub mod connection;
pub mod hub;
pub mod online;
pub mod presence;

pub use hub::{PresenceEvent, PresenceHandle, PresenceHub};
pub use online::OnlineTracker;
pub use presence::{ConversationPresence, PeerPresence};
