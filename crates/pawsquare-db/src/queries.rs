use crate::Database;
use crate::models::{
    BanRow, CommentRow, ConversationRow, MessageRow, NotificationRow, PetPhotoRow, PetRow,
    PostRow, ProfileRow, ReportRow, UserRow, UserSummaryRow,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// `?1, ?2, ...` placeholder list for IN clauses.
fn in_placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Profiles --

    /// Partial update: `None` fields keep their current value.
    pub fn upsert_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        bio: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, display_name, bio, avatar_url)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, display_name),
                     bio          = COALESCE(excluded.bio, bio),
                     avatar_url   = COALESCE(excluded.avatar_url, avatar_url),
                     updated_at   = datetime('now')",
                params![user_id, display_name, bio, avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.username, p.display_name, p.bio, p.avatar_url, u.created_at
                     FROM users u
                     LEFT JOIN profiles p ON p.user_id = u.id
                     WHERE u.id = ?1",
                    [user_id],
                    |row| {
                        Ok(ProfileRow {
                            user_id: row.get(0)?,
                            username: row.get(1)?,
                            display_name: row.get(2)?,
                            bio: row.get(3)?,
                            avatar_url: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Posts --

    pub fn insert_post(
        &self,
        id: &str,
        author_id: &str,
        content: &str,
        image_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content, image_url) VALUES (?1, ?2, ?3, ?4)",
                params![id, author_id, content, image_url],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{POST_SELECT} WHERE p.id = ?1"),
                    [id],
                    map_post_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Newest-first feed with cursor pagination: pass the `created_at` of the
    /// oldest post from the previous page to fetch older posts.
    pub fn get_posts(&self, limit: u32, before: Option<&str>) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut rows = Vec::new();
            if let Some(before) = before {
                let mut stmt = conn.prepare(&format!(
                    "{POST_SELECT} WHERE p.created_at < ?1 ORDER BY p.created_at DESC LIMIT ?2"
                ))?;
                let mapped = stmt.query_map(params![before, limit], map_post_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            } else {
                let mut stmt =
                    conn.prepare(&format!("{POST_SELECT} ORDER BY p.created_at DESC LIMIT ?1"))?;
                let mapped = stmt.query_map(params![limit], map_post_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            Ok(rows)
        })
    }

    /// Deletes a post and its dependent rows. Returns false if no such post.
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM likes WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM bookmarks WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM comments WHERE post_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    /// Batch like counts, one row per post that has any likes.
    pub fn count_likes_for_posts(&self, post_ids: &[String]) -> Result<Vec<(String, i64)>> {
        self.count_grouped("likes", post_ids)
    }

    pub fn count_comments_for_posts(&self, post_ids: &[String]) -> Result<Vec<(String, i64)>> {
        self.count_grouped("comments", post_ids)
    }

    fn count_grouped(&self, table: &str, post_ids: &[String]) -> Result<Vec<(String, i64)>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id, COUNT(*) FROM {table} WHERE post_id IN ({}) GROUP BY post_id",
                in_placeholders(post_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(bound.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Of `post_ids`, the subset this user has liked.
    pub fn get_liked_post_ids(&self, user_id: &str, post_ids: &[String]) -> Result<Vec<String>> {
        self.membership("likes", user_id, post_ids)
    }

    pub fn get_bookmarked_post_ids(
        &self,
        user_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>> {
        self.membership("bookmarks", user_id, post_ids)
    }

    fn membership(&self, table: &str, user_id: &str, post_ids: &[String]) -> Result<Vec<String>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id FROM {table} WHERE user_id = ?1 AND post_id IN ({})",
                // shift placeholders past ?1
                (2..=post_ids.len() + 1)
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            for id in post_ids {
                bound.push(id);
            }
            let rows = stmt
                .query_map(bound.as_slice(), |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a like: removes if present, inserts if not. Returns true when
    /// the like is now active.
    pub fn toggle_like(&self, id: &str, post_id: &str, user_id: &str) -> Result<bool> {
        self.toggle_mark("likes", id, post_id, user_id)
    }

    pub fn toggle_bookmark(&self, id: &str, post_id: &str, user_id: &str) -> Result<bool> {
        self.toggle_mark("bookmarks", id, post_id, user_id)
    }

    fn toggle_mark(&self, table: &str, id: &str, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    &format!("SELECT id FROM {table} WHERE post_id = ?1 AND user_id = ?2"),
                    params![post_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    &format!("INSERT INTO {table} (id, post_id, user_id) VALUES (?1, ?2, ?3)"),
                    params![id, post_id, user_id],
                )?;
                Ok(true)
            }
        })
    }

    pub fn get_bookmarked_posts(&self, user_id: &str, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{POST_SELECT}
                 JOIN bookmarks b ON b.post_id = p.id
                 WHERE b.user_id = ?1
                 ORDER BY b.created_at DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Comments --

    pub fn insert_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                params![id, post_id, author_id, content],
            )?;
            Ok(())
        })
    }

    pub fn get_comments(&self, post_id: &str, limit: u32) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
                 FROM comments c
                 LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![post_id, limit], map_comment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
                     FROM comments c
                     LEFT JOIN users u ON c.author_id = u.id
                     WHERE c.id = ?1",
                    [id],
                    map_comment_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Follows --

    /// Toggle a follow edge. Returns true when the caller now follows the target.
    pub fn toggle_follow(&self, id: &str, follower_id: &str, followed_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
                    params![follower_id, followed_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM follows WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO follows (id, follower_id, followed_id) VALUES (?1, ?2, ?3)",
                    params![id, follower_id, followed_id],
                )?;
                Ok(true)
            }
        })
    }

    pub fn get_followers(&self, user_id: &str) -> Result<Vec<UserSummaryRow>> {
        self.user_edge_list(
            "SELECT u.id, u.username, p.display_name, p.avatar_url
             FROM follows f
             JOIN users u ON u.id = f.follower_id
             LEFT JOIN profiles p ON p.user_id = u.id
             WHERE f.followed_id = ?1
             ORDER BY f.created_at DESC",
            user_id,
        )
    }

    pub fn get_following(&self, user_id: &str) -> Result<Vec<UserSummaryRow>> {
        self.user_edge_list(
            "SELECT u.id, u.username, p.display_name, p.avatar_url
             FROM follows f
             JOIN users u ON u.id = f.followed_id
             LEFT JOIN profiles p ON p.user_id = u.id
             WHERE f.follower_id = ?1
             ORDER BY f.created_at DESC",
            user_id,
        )
    }

    fn user_edge_list(&self, sql: &str, user_id: &str) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UserSummaryRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_followers(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE followed_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn count_following(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    // -- Pets --

    pub fn insert_pet(
        &self,
        id: &str,
        owner_id: &str,
        name: &str,
        species: &str,
        breed: Option<&str>,
        birthdate: Option<&str>,
        bio: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pets (id, owner_id, name, species, breed, birthdate, bio)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, owner_id, name, species, breed, birthdate, bio],
            )?;
            Ok(())
        })
    }

    pub fn get_pet(&self, id: &str) -> Result<Option<PetRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, name, species, breed, birthdate, bio, created_at
                     FROM pets WHERE id = ?1",
                    [id],
                    map_pet_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_pets_by_owner(&self, owner_id: &str) -> Result<Vec<PetRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, species, breed, birthdate, bio, created_at
                 FROM pets WHERE owner_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([owner_id], map_pet_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Partial update: `None` fields keep their current value.
    pub fn update_pet(
        &self,
        id: &str,
        name: Option<&str>,
        species: Option<&str>,
        breed: Option<&str>,
        birthdate: Option<&str>,
        bio: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE pets SET
                     name      = COALESCE(?2, name),
                     species   = COALESCE(?3, species),
                     breed     = COALESCE(?4, breed),
                     birthdate = COALESCE(?5, birthdate),
                     bio       = COALESCE(?6, bio)
                 WHERE id = ?1",
                params![id, name, species, breed, birthdate, bio],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn delete_pet(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM pet_photos WHERE pet_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM pets WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    pub fn insert_pet_photo(
        &self,
        id: &str,
        pet_id: &str,
        path: &str,
        content_type: &str,
        sha256: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pet_photos (id, pet_id, path, content_type, sha256, caption)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, pet_id, path, content_type, sha256, caption],
            )?;
            Ok(())
        })
    }

    pub fn get_pet_photos(&self, pet_id: &str) -> Result<Vec<PetPhotoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pet_id, path, content_type, sha256, caption, created_at
                 FROM pet_photos WHERE pet_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([pet_id], map_pet_photo_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_pet_photo(&self, id: &str) -> Result<Option<PetPhotoRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, pet_id, path, content_type, sha256, caption, created_at
                     FROM pet_photos WHERE id = ?1",
                    [id],
                    map_pet_photo_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_pet_photo(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM pet_photos WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Conversations & messages --

    /// The two-party conversation between these users, if one exists.
    /// Uniqueness per unordered pair is enforced here: callers go through
    /// this lookup before creating.
    pub fn find_conversation_between(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT p1.conversation_id
                     FROM conversation_participants p1
                     JOIN conversation_participants p2
                       ON p1.conversation_id = p2.conversation_id
                     WHERE p1.user_id = ?1 AND p2.user_id = ?2",
                    params![a, b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn create_conversation(&self, id: &str, a: &str, b: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("INSERT INTO conversations (id) VALUES (?1)", [id])?;
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                params![id, a],
            )?;
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                params![id, b],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, u.id, u.username, p.display_name, p.avatar_url, c.created_at
                 FROM conversations c
                 JOIN conversation_participants me
                   ON me.conversation_id = c.id AND me.user_id = ?1
                 JOIN conversation_participants other
                   ON other.conversation_id = c.id AND other.user_id != ?1
                 JOIN users u ON u.id = other.user_id
                 LEFT JOIN profiles p ON p.user_id = u.id
                 ORDER BY c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        peer_id: row.get(1)?,
                        peer_username: row.get(2)?,
                        peer_display_name: row.get(3)?,
                        peer_avatar_url: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// The other participant of a two-party conversation.
    pub fn get_conversation_peer(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id != ?2",
                    params![conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, conversation_id, sender_id, content],
            )?;
            Ok(())
        })
    }

    /// Newest-first with cursor pagination via `before`.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut rows = Vec::new();
            if let Some(before) = before {
                let mut stmt = conn.prepare(&format!(
                    "{MESSAGE_SELECT}
                     WHERE m.conversation_id = ?1 AND m.created_at < ?2
                     ORDER BY m.created_at DESC LIMIT ?3"
                ))?;
                let mapped =
                    stmt.query_map(params![conversation_id, before, limit], map_message_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            } else {
                let mut stmt = conn.prepare(&format!(
                    "{MESSAGE_SELECT}
                     WHERE m.conversation_id = ?1
                     ORDER BY m.created_at DESC LIMIT ?2"
                ))?;
                let mapped = stmt.query_map(params![conversation_id, limit], map_message_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            Ok(rows)
        })
    }

    /// Batch-fetch the latest message of each conversation.
    pub fn get_last_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 JOIN (SELECT conversation_id, MAX(created_at) AS latest
                       FROM messages
                       WHERE conversation_id IN ({})
                       GROUP BY conversation_id) t
                   ON m.conversation_id = t.conversation_id AND m.created_at = t.latest",
                in_placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(bound.as_slice(), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        recipient_id: &str,
        actor_id: &str,
        kind: &str,
        post_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, actor_id, kind, post_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, recipient_id, actor_id, kind, post_id],
            )?;
            Ok(())
        })
    }

    pub fn get_notifications(&self, recipient_id: &str, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.kind, n.actor_id, u.username, p.display_name, p.avatar_url,
                        n.post_id, n.read, n.created_at
                 FROM notifications n
                 JOIN users u ON u.id = n.actor_id
                 LEFT JOIN profiles p ON p.user_id = u.id
                 WHERE n.recipient_id = ?1
                 ORDER BY n.created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![recipient_id, limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        actor_id: row.get(2)?,
                        actor_username: row.get(3)?,
                        actor_display_name: row.get(4)?,
                        actor_avatar_url: row.get(5)?,
                        post_id: row.get(6)?,
                        read: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark one notification read; scoped to the recipient so users cannot
    /// touch each other's rows.
    pub fn mark_notification_read(&self, id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
                params![id, recipient_id],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
                [recipient_id],
            )?;
            Ok(updated)
        })
    }

    // -- Moderation --

    pub fn insert_report(
        &self,
        id: &str,
        reporter_id: &str,
        target_kind: &str,
        target_id: &str,
        reason: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, reporter_id, target_kind, target_id, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, reporter_id, target_kind, target_id, reason],
            )?;
            Ok(())
        })
    }

    pub fn get_reports(&self, status: Option<&str>, limit: u32) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let mut rows = Vec::new();
            if let Some(status) = status {
                let mut stmt = conn.prepare(&format!(
                    "{REPORT_SELECT} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let mapped = stmt.query_map(params![status, limit], map_report_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            } else {
                let mut stmt = conn
                    .prepare(&format!("{REPORT_SELECT} ORDER BY created_at DESC LIMIT ?1"))?;
                let mapped = stmt.query_map(params![limit], map_report_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            Ok(rows)
        })
    }

    pub fn set_report_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE reports SET status = ?2 WHERE id = ?1",
                params![id, status],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn add_role(&self, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![user_id, role],
            )?;
            Ok(())
        })
    }

    /// Moderator or admin.
    pub fn is_moderator(&self, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT role FROM user_roles
                     WHERE user_id = ?1 AND role IN ('moderator', 'admin')",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn ban_user(
        &self,
        user_id: &str,
        reason: &str,
        issued_by: &str,
        expires_at: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_bans (user_id, reason, issued_by, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     reason = excluded.reason,
                     issued_by = excluded.issued_by,
                     expires_at = excluded.expires_at,
                     created_at = datetime('now')",
                params![user_id, reason, issued_by, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn unban_user(&self, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM user_bans WHERE user_id = ?1", [user_id])?;
            Ok(deleted > 0)
        })
    }

    /// A ban counts as active while it has no expiry or the expiry is in the
    /// future.
    pub fn is_banned(&self, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM user_bans
                     WHERE user_id = ?1
                       AND (expires_at IS NULL OR expires_at > datetime('now'))",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_bans(&self) -> Result<Vec<BanRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.user_id, u.username, b.reason, b.issued_by, b.expires_at, b.created_at
                 FROM user_bans b
                 JOIN users u ON u.id = b.user_id
                 ORDER BY b.created_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(BanRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        reason: row.get(2)?,
                        issued_by: row.get(3)?,
                        expires_at: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- AI usage --

    pub fn insert_ai_usage(&self, id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ai_usage (id, user_id) VALUES (?1, ?2)",
                params![id, user_id],
            )?;
            Ok(())
        })
    }

    /// Sliding-window usage count. `cutoff` is a SQLite datetime string
    /// (`YYYY-MM-DD HH:MM:SS`, UTC); string comparison matches chronological
    /// order for this format.
    pub fn count_ai_usage_since(&self, user_id: &str, cutoff: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM ai_usage WHERE user_id = ?1 AND created_at >= ?2",
                params![user_id, cutoff],
                |row| row.get(0),
            )?)
        })
    }

    /// Drops usage rows older than `cutoff`. Returns the number pruned.
    pub fn prune_ai_usage(&self, cutoff: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM ai_usage WHERE created_at < ?1", [cutoff])?;
            Ok(deleted)
        })
    }
}

// -- Shared SELECT fragments and row mappers --

const POST_SELECT: &str = "SELECT p.id, p.author_id, u.username, p.content, p.image_url, p.created_at
     FROM posts p
     LEFT JOIN users u ON p.author_id = u.id";

fn map_post_row(row: &rusqlite::Row<'_>) -> std::result::Result<PostRow, rusqlite::Error> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(3)?,
        image_url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_comment_row(row: &rusqlite::Row<'_>) -> std::result::Result<CommentRow, rusqlite::Error> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_pet_row(row: &rusqlite::Row<'_>) -> std::result::Result<PetRow, rusqlite::Error> {
    Ok(PetRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        species: row.get(3)?,
        breed: row.get(4)?,
        birthdate: row.get(5)?,
        bio: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_pet_photo_row(row: &rusqlite::Row<'_>) -> std::result::Result<PetPhotoRow, rusqlite::Error> {
    Ok(PetPhotoRow {
        id: row.get(0)?,
        pet_id: row.get(1)?,
        path: row.get(2)?,
        content_type: row.get(3)?,
        sha256: row.get(4)?,
        caption: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const REPORT_SELECT: &str =
    "SELECT id, reporter_id, target_kind, target_id, reason, status, created_at FROM reports";

fn map_report_row(row: &rusqlite::Row<'_>) -> std::result::Result<ReportRow, rusqlite::Error> {
    Ok(ReportRow {
        id: row.get(0)?,
        reporter_id: row.get(1)?,
        target_kind: row.get(2)?,
        target_id: row.get(3)?,
        reason: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, created_at FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, name, "not-a-real-hash").unwrap();
        id
    }

    #[test]
    fn like_toggles() {
        let db = test_db();
        let author = add_user(&db, "alice");
        let liker = add_user(&db, "bob");
        let post_id = Uuid::new_v4().to_string();
        db.insert_post(&post_id, &author, "first post", None).unwrap();

        let a = Uuid::new_v4().to_string();
        assert!(db.toggle_like(&a, &post_id, &liker).unwrap());
        let counts = db.count_likes_for_posts(&[post_id.clone()]).unwrap();
        assert_eq!(counts, vec![(post_id.clone(), 1)]);

        let b = Uuid::new_v4().to_string();
        assert!(!db.toggle_like(&b, &post_id, &liker).unwrap());
        assert!(db.count_likes_for_posts(&[post_id]).unwrap().is_empty());
    }

    #[test]
    fn follow_toggles_and_counts() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let id = Uuid::new_v4().to_string();
        assert!(db.toggle_follow(&id, &a, &b).unwrap());
        assert_eq!(db.count_followers(&b).unwrap(), 1);
        assert_eq!(db.count_following(&a).unwrap(), 1);
        assert_eq!(db.get_followers(&b).unwrap()[0].username, "alice");

        let id = Uuid::new_v4().to_string();
        assert!(!db.toggle_follow(&id, &a, &b).unwrap());
        assert_eq!(db.count_followers(&b).unwrap(), 0);
    }

    #[test]
    fn conversation_is_unique_per_pair() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        assert!(db.find_conversation_between(&a, &b).unwrap().is_none());

        let conv = Uuid::new_v4().to_string();
        db.create_conversation(&conv, &a, &b).unwrap();

        // Lookup works from both sides
        assert_eq!(db.find_conversation_between(&a, &b).unwrap(), Some(conv.clone()));
        assert_eq!(db.find_conversation_between(&b, &a).unwrap(), Some(conv.clone()));

        assert!(db.is_participant(&conv, &a).unwrap());
        assert_eq!(db.get_conversation_peer(&conv, &a).unwrap(), Some(b));
    }

    #[test]
    fn profile_partial_update_keeps_unset_fields() {
        let db = test_db();
        let a = add_user(&db, "alice");

        db.upsert_profile(&a, Some("Alice"), Some("dog person"), None)
            .unwrap();
        db.upsert_profile(&a, None, None, Some("https://cdn/a.png"))
            .unwrap();

        let profile = db.get_profile(&a).unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        assert_eq!(profile.bio.as_deref(), Some("dog person"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn/a.png"));
    }

    fn insert_usage_at(db: &Database, user_id: &str, at: &str) {
        let id = Uuid::new_v4().to_string();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ai_usage (id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![id, user_id, at],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn usage_window_counts_exactly_the_trailing_hour() {
        let db = test_db();
        let user = add_user(&db, "alice");
        let now = Utc::now();
        let fmt = "%Y-%m-%d %H:%M:%S";

        // 19 recent rows, one stale row outside the window
        for i in 0..19 {
            let at = (now - Duration::minutes(i * 3)).format(fmt).to_string();
            insert_usage_at(&db, &user, &at);
        }
        insert_usage_at(&db, &user, &(now - Duration::hours(2)).format(fmt).to_string());

        let cutoff = (now - Duration::hours(1)).format(fmt).to_string();
        assert_eq!(db.count_ai_usage_since(&user, &cutoff).unwrap(), 19);

        // 20th recent row crosses the cap boundary
        insert_usage_at(&db, &user, &now.format(fmt).to_string());
        assert_eq!(db.count_ai_usage_since(&user, &cutoff).unwrap(), 20);
    }

    #[test]
    fn usage_pruning_only_drops_old_rows() {
        let db = test_db();
        let user = add_user(&db, "alice");
        let now = Utc::now();
        let fmt = "%Y-%m-%d %H:%M:%S";

        insert_usage_at(&db, &user, &(now - Duration::hours(30)).format(fmt).to_string());
        insert_usage_at(&db, &user, &now.format(fmt).to_string());

        let cutoff = (now - Duration::hours(24)).format(fmt).to_string();
        assert_eq!(db.prune_ai_usage(&cutoff).unwrap(), 1);

        let window = (now - Duration::hours(1)).format(fmt).to_string();
        assert_eq!(db.count_ai_usage_since(&user, &window).unwrap(), 1);
    }

    #[test]
    fn ban_respects_expiry() {
        let db = test_db();
        let mod_id = add_user(&db, "mod");
        let banned = add_user(&db, "troll");

        db.ban_user(&banned, "spam", &mod_id, None).unwrap();
        assert!(db.is_banned(&banned).unwrap());

        // Expired ban no longer counts
        let past = (Utc::now() - Duration::hours(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        db.ban_user(&banned, "spam", &mod_id, Some(&past)).unwrap();
        assert!(!db.is_banned(&banned).unwrap());

        assert!(db.unban_user(&banned).unwrap());
        assert!(!db.unban_user(&banned).unwrap());
    }
}
