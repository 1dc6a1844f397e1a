use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS profiles (
            user_id      TEXT PRIMARY KEY REFERENCES users(id),
            display_name TEXT,
            bio          TEXT,
            avatar_url   TEXT,
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            image_url   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS likes (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(post_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_likes_post
            ON likes(post_id);

        CREATE TABLE IF NOT EXISTS bookmarks (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(post_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_bookmarks_user
            ON bookmarks(user_id, created_at);

        CREATE TABLE IF NOT EXISTS follows (
            id           TEXT PRIMARY KEY,
            follower_id  TEXT NOT NULL REFERENCES users(id),
            followed_id  TEXT NOT NULL REFERENCES users(id),
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(follower_id, followed_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_followed
            ON follows(followed_id);

        CREATE TABLE IF NOT EXISTS pets (
            id          TEXT PRIMARY KEY,
            owner_id    TEXT NOT NULL REFERENCES users(id),
            name        TEXT NOT NULL,
            species     TEXT NOT NULL,
            breed       TEXT,
            birthdate   TEXT,
            bio         TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_pets_owner
            ON pets(owner_id);

        CREATE TABLE IF NOT EXISTS pet_photos (
            id           TEXT PRIMARY KEY,
            pet_id       TEXT NOT NULL REFERENCES pets(id),
            path         TEXT NOT NULL,
            content_type TEXT NOT NULL,
            sha256       TEXT NOT NULL,
            caption      TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_pet_photos_pet
            ON pet_photos(pet_id, created_at);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id            TEXT PRIMARY KEY,
            recipient_id  TEXT NOT NULL REFERENCES users(id),
            actor_id      TEXT NOT NULL REFERENCES users(id),
            kind          TEXT NOT NULL,
            post_id       TEXT,
            read          INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, created_at);

        CREATE TABLE IF NOT EXISTS reports (
            id           TEXT PRIMARY KEY,
            reporter_id  TEXT NOT NULL REFERENCES users(id),
            target_kind  TEXT NOT NULL,
            target_id    TEXT NOT NULL,
            reason       TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'open',
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_reports_status
            ON reports(status, created_at);

        CREATE TABLE IF NOT EXISTS user_roles (
            user_id  TEXT NOT NULL REFERENCES users(id),
            role     TEXT NOT NULL,
            PRIMARY KEY (user_id, role)
        );

        CREATE TABLE IF NOT EXISTS user_bans (
            user_id     TEXT PRIMARY KEY REFERENCES users(id),
            reason      TEXT NOT NULL,
            issued_by   TEXT NOT NULL REFERENCES users(id),
            expires_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ai_usage (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_ai_usage_user
            ON ai_usage(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
