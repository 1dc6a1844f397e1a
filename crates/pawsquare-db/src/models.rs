/// Database row types — these map directly to SQLite rows.
/// Distinct from the pawsquare-types API models to keep the DB layer
/// independent. Ids and timestamps stay TEXT here; the API layer parses.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Compact user reference joined into lists (followers, peers, actors).
pub struct UserSummaryRow {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct PetRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub birthdate: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

pub struct PetPhotoRow {
    pub id: String,
    pub pet_id: String,
    pub path: String,
    pub content_type: String,
    pub sha256: String,
    pub caption: Option<String>,
    pub created_at: String,
}

/// A conversation from one participant's point of view: the row carries the
/// other party, not the caller.
pub struct ConversationRow {
    pub id: String,
    pub peer_id: String,
    pub peer_username: String,
    pub peer_display_name: Option<String>,
    pub peer_avatar_url: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub kind: String,
    pub actor_id: String,
    pub actor_username: String,
    pub actor_display_name: Option<String>,
    pub actor_avatar_url: Option<String>,
    pub post_id: Option<String>,
    pub read: bool,
    pub created_at: String,
}

pub struct ReportRow {
    pub id: String,
    pub reporter_id: String,
    pub target_kind: String,
    pub target_id: String,
    pub reason: String,
    pub status: String,
    pub created_at: String,
}

pub struct BanRow {
    pub user_id: String,
    pub username: String,
    pub reason: String,
    pub issued_by: String,
    pub expires_at: Option<String>,
    pub created_at: String,
}
