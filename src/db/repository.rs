use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    NewPost, NewSubscription, Post, PushStatus, SettingsSnapshot, SettingsUpdate, StatusUpdate,
    Subscription,
};

use super::schema::SCHEMA;

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on old builds.
const ID_CHUNK: usize = 500;

const POST_COLUMNS: &str = "post_id, title, summary, content, category, creator, pub_date, \
                            push_status, matched_subscription_id, delivered_at";

const SUBSCRIPTION_COLUMNS: &str = "id, keyword1, keyword2, keyword3, creator, category, created_at";

/// Outcome of a best-effort batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Post operations

    /// Which of `ids` are already stored.
    pub async fn existing_post_ids(&self, ids: Vec<i64>) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found = self
            .conn
            .call(move |conn| {
                let mut found = HashSet::new();
                for chunk in ids.chunks(ID_CHUNK) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT post_id FROM posts WHERE post_id IN ({})",
                        placeholders
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                        row.get::<_, i64>(0)
                    })?;
                    for id in rows {
                        found.insert(id?);
                    }
                }
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    /// Insert posts as `Pending` in one transaction. Rows whose `post_id`
    /// already exists are skipped; a failing row is logged and counted without
    /// affecting the others.
    pub async fn insert_posts(&self, posts: Vec<NewPost>) -> Result<InsertReport> {
        let report = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut report = InsertReport::default();
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO posts
                               (post_id, title, summary, content, category, creator, pub_date, push_status)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    )?;
                    for post in &posts {
                        let result = stmt.execute(params![
                            post.post_id,
                            post.title,
                            post.summary,
                            post.content,
                            post.category,
                            post.creator,
                            post.pub_date.to_rfc3339(),
                            PushStatus::Pending.as_i64(),
                        ]);
                        match result {
                            Ok(0) => report.skipped += 1,
                            Ok(_) => report.inserted += 1,
                            Err(e) => {
                                tracing::warn!("Failed to insert post {}: {}", post.post_id, e);
                                report.failed += 1;
                            }
                        }
                    }
                }
                tx.commit()?;
                Ok(report)
            })
            .await?;
        Ok(report)
    }

    /// Apply a batch of status transitions atomically. Each row only changes
    /// if the post is still in the expected `from` state. Returns the ids of
    /// the posts that changed.
    pub async fn update_post_statuses(&self, updates: Vec<StatusUpdate>) -> Result<Vec<i64>> {
        let updates: Vec<StatusUpdate> = updates
            .into_iter()
            .filter(|u| {
                if u.is_valid() {
                    true
                } else {
                    tracing::warn!(
                        "Rejected status transition {} -> {} for post {}",
                        u.from.label(),
                        u.to.label(),
                        u.post_id
                    );
                    false
                }
            })
            .collect();
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let changed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut changed = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        r#"UPDATE posts SET
                               push_status = ?1,
                               matched_subscription_id = COALESCE(?2, matched_subscription_id),
                               delivered_at = COALESCE(?3, delivered_at)
                           WHERE post_id = ?4 AND push_status = ?5"#,
                    )?;
                    for update in &updates {
                        let result = stmt.execute(params![
                            update.to.as_i64(),
                            update.matched_subscription_id,
                            update.delivered_at.map(|dt| dt.to_rfc3339()),
                            update.post_id,
                            update.from.as_i64(),
                        ]);
                        match result {
                            Ok(0) => tracing::debug!(
                                "Post {} was no longer {}, status left as is",
                                update.post_id,
                                update.from.label()
                            ),
                            Ok(_) => changed.push(update.post_id),
                            Err(e) => {
                                tracing::warn!(
                                    "Failed to update status of post {}: {}",
                                    update.post_id,
                                    e
                                );
                            }
                        }
                    }
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        Ok(changed)
    }

    pub async fn get_posts_by_status(&self, status: PushStatus) -> Result<Vec<Post>> {
        let posts = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM posts WHERE push_status = ?1 ORDER BY post_id",
                    POST_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let posts = stmt
                    .query_map(params![status.as_i64()], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    pub async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let post = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM posts WHERE post_id = ?1", POST_COLUMNS);
                let post = conn
                    .query_row(&sql, params![post_id], post_from_row)
                    .optional()?;
                Ok(post)
            })
            .await?;
        Ok(post)
    }

    // Subscription operations

    pub async fn insert_subscription(&self, subscription: NewSubscription) -> Result<Subscription> {
        let subscription = subscription.validate()?;
        let id = self
            .conn
            .call(move |conn| {
                let mut keywords = subscription.keywords.into_iter();
                conn.execute(
                    r#"INSERT INTO subscriptions (keyword1, keyword2, keyword3, creator, category, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        keywords.next(),
                        keywords.next(),
                        keywords.next(),
                        subscription.creator,
                        subscription.category,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        self.get_subscription(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", id)))
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let subscription = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM subscriptions WHERE id = ?1",
                    SUBSCRIPTION_COLUMNS
                );
                let subscription = conn
                    .query_row(&sql, params![id], subscription_from_row)
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    /// All subscriptions, most recently created first. This order is the
    /// first-match-wins order of the matcher.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self
            .conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {} FROM subscriptions ORDER BY id DESC",
                    SUBSCRIPTION_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let subscriptions = stmt
                    .query_map([], subscription_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }

    pub async fn delete_subscription(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
                Ok(deleted)
            })
            .await?;
        if deleted == 0 {
            return Err(AppError::NotFound(format!("subscription {}", id)));
        }
        Ok(())
    }

    // Settings

    pub async fn get_settings(&self) -> Result<SettingsSnapshot> {
        let settings = self
            .conn
            .call(|conn| {
                let settings = conn.query_row(
                    "SELECT only_title, stop_push, bound_chat_id, bot_token, updated_at FROM settings WHERE id = 1",
                    [],
                    settings_from_row,
                )?;
                Ok(settings)
            })
            .await?;
        Ok(settings)
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsSnapshot> {
        let settings = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current = tx.query_row(
                    "SELECT only_title, stop_push, bound_chat_id, bot_token, updated_at FROM settings WHERE id = 1",
                    [],
                    settings_from_row,
                )?;
                let mut next = update.apply(current);
                next.updated_at = Some(Utc::now());
                tx.execute(
                    r#"UPDATE settings SET
                           only_title = ?1,
                           stop_push = ?2,
                           bound_chat_id = ?3,
                           bot_token = ?4,
                           updated_at = ?5
                       WHERE id = 1"#,
                    params![
                        next.only_title,
                        next.stop_push,
                        next.bound_chat_id,
                        next.bot_token,
                        next.updated_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                tx.commit()?;
                Ok(next)
            })
            .await?;
        Ok(settings)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    let raw_status: i64 = row.get(7)?;
    let push_status = PushStatus::from_i64(raw_status)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(7, raw_status))?;

    Ok(Post {
        post_id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        creator: row.get(5)?,
        pub_date: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        push_status,
        matched_subscription_id: row.get(8)?,
        delivered_at: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| parse_datetime(&s)),
    })
}

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        keyword1: row.get(1)?,
        keyword2: row.get(2)?,
        keyword3: row.get(3)?,
        creator: row.get(4)?,
        category: row.get(5)?,
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<SettingsSnapshot> {
    Ok(SettingsSnapshot {
        only_title: row.get::<_, i64>(0)? != 0,
        stop_push: row.get::<_, i64>(1)? != 0,
        bound_chat_id: row.get(2)?,
        bot_token: row.get(3)?,
        updated_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_datetime(&s)),
    })
}
