use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store connection lock poisoned")]
    Poisoned,
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Row counts per table, for maintenance output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub posts: i64,
    pub redweets: i64,
    pub likes: i64,
    pub follows: i64,
    pub pending_media: i64,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                email TEXT UNIQUE NOT NULL,
                bio TEXT NOT NULL DEFAULT '',
                pfp_url TEXT NOT NULL DEFAULT '',
                follower_count INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                media TEXT NOT NULL DEFAULT '[]',
                like_count INTEGER NOT NULL DEFAULT 0,
                reply_count INTEGER NOT NULL DEFAULT 0,
                redweet_count INTEGER NOT NULL DEFAULT 0,
                is_reply INTEGER NOT NULL DEFAULT 0,
                parent_id TEXT,
                posted_at TEXT NOT NULL,
                last_updated_at TEXT NOT NULL,
                FOREIGN KEY (author) REFERENCES users(username),
                FOREIGN KEY (parent_id) REFERENCES posts(id)
            );

            CREATE TABLE IF NOT EXISTS redweets (
                id TEXT PRIMARY KEY,
                author TEXT NOT NULL,
                post_id TEXT NOT NULL,
                redweeted_at TEXT NOT NULL,
                FOREIGN KEY (author) REFERENCES users(username),
                FOREIGN KEY (post_id) REFERENCES posts(id),
                UNIQUE(author, post_id)
            );

            CREATE TABLE IF NOT EXISTS likes (
                username TEXT NOT NULL,
                post_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (username, post_id),
                FOREIGN KEY (username) REFERENCES users(username),
                FOREIGN KEY (post_id) REFERENCES posts(id)
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower TEXT NOT NULL,
                followed TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (follower, followed),
                FOREIGN KEY (follower) REFERENCES users(username),
                FOREIGN KEY (followed) REFERENCES users(username),
                CHECK (follower <> followed)
            );

            CREATE TABLE IF NOT EXISTS media_releases (
                link TEXT PRIMARY KEY,
                queued_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author, posted_at DESC);
            CREATE INDEX IF NOT EXISTS idx_posts_parent_id ON posts(parent_id);
            CREATE INDEX IF NOT EXISTS idx_redweets_post_id ON redweets(post_id);
            CREATE INDEX IF NOT EXISTS idx_redweets_author ON redweets(author, redweeted_at DESC);
            CREATE INDEX IF NOT EXISTS idx_likes_post_id ON likes(post_id);
            CREATE INDEX IF NOT EXISTS idx_follows_followed ON follows(followed);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` inside an IMMEDIATE transaction. The transaction commits only if
    /// `f` returns Ok; any error rolls every write back.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&StoreTx { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    /// Run read-only work against one consistent snapshot
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&StoreTx { conn: &tx })?;
        tx.finish().map_err(StoreError::from)?;
        Ok(value)
    }

    // ==================== Convenience Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        user.created_at = now();
        user.follower_count = 0;
        user.following_count = 0;
        self.with_transaction(|tx| tx.insert_user(user))
    }

    pub fn get_user(&self, username: &str) -> StoreResult<User> {
        self.read(|tx| tx.get_user(username))
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        self.read(|tx| tx.get_post(id))
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.read(|tx| {
            Ok(StoreStats {
                users: tx.count("users")?,
                posts: tx.count("posts")?,
                redweets: tx.count("redweets")?,
                likes: tx.count("likes")?,
                follows: tx.count("follows")?,
                pending_media: tx.count("media_releases")?,
            })
        })
    }
}

/// Store operations bound to one open transaction
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    fn count(&self, table: &'static str) -> StoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== User Operations ====================

    pub fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.conn.execute(
            r#"INSERT INTO users (username, name, email, bio, pfp_url, follower_count,
                following_count, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                &user.username,
                &user.name,
                &user.email,
                &user.bio,
                &user.pfp_url,
                user.follower_count,
                user.following_count,
                format_datetime(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> StoreResult<User> {
        self.conn
            .query_row(
                "SELECT * FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("User {}", username))
                }
                _ => StoreError::Database(e),
            })
    }

    pub fn delete_user_row(&self, username: &str) -> StoreResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", username)));
        }
        Ok(())
    }

    pub fn user_exists(&self, username: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            params![username],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Whether a user other than `except` already registered `email`
    pub fn email_taken(&self, email: &str, except: Option<&str>) -> StoreResult<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND username IS NOT ?2)",
            params![email, except],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    pub fn update_user_profile(
        &self,
        username: &str,
        name: &str,
        email: &str,
        bio: &str,
        pfp_url: &str,
    ) -> StoreResult<()> {
        let rows = self.conn.execute(
            r#"UPDATE users SET name = ?1, email = ?2, bio = ?3, pfp_url = ?4
               WHERE username = ?5"#,
            params![name, email, bio, pfp_url, username],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", username)));
        }
        Ok(())
    }

    /// Users whose username contains `query`, most followed first
    pub fn search_users(
        &self,
        query: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT * FROM users WHERE instr(username, ?1) > 0
               ORDER BY follower_count DESC, username ASC LIMIT ?2 OFFSET ?3"#,
        )?;
        let users = stmt
            .query_map(params![query, sql_limit(limit), sql_offset(offset)], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn adjust_user_counter(
        &self,
        username: &str,
        counter: UserCounter,
        delta: i64,
    ) -> StoreResult<()> {
        let sql = format!(
            "UPDATE users SET {col} = {col} + ?1 WHERE username = ?2",
            col = counter.column()
        );
        let rows = self.conn.execute(&sql, params![delta, username])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", username)));
        }
        Ok(())
    }

    /// Users following `username`, most recent follow first
    pub fn followers(
        &self,
        username: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT u.* FROM follows f JOIN users u ON u.username = f.follower
               WHERE f.followed = ?1
               ORDER BY f.created_at DESC, u.username ASC LIMIT ?2 OFFSET ?3"#,
        )?;
        let users = stmt
            .query_map(
                params![username, sql_limit(limit), sql_offset(offset)],
                row_to_user,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Users that `username` follows, most recent follow first
    pub fn following(
        &self,
        username: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT u.* FROM follows f JOIN users u ON u.username = f.followed
               WHERE f.follower = ?1
               ORDER BY f.created_at DESC, u.username ASC LIMIT ?2 OFFSET ?3"#,
        )?;
        let users = stmt
            .query_map(
                params![username, sql_limit(limit), sql_offset(offset)],
                row_to_user,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn follow_exists(&self, follower: &str, followed: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower = ?1 AND followed = ?2)",
            params![follower, followed],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn insert_follow(&self, follower: &str, followed: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO follows (follower, followed, created_at) VALUES (?1, ?2, ?3)",
            params![follower, followed, format_datetime(&now())],
        )?;
        Ok(())
    }

    pub fn delete_follow(&self, follower: &str, followed: &str) -> StoreResult<()> {
        let rows = self.conn.execute(
            "DELETE FROM follows WHERE follower = ?1 AND followed = ?2",
            params![follower, followed],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!(
                "Follow {} -> {}",
                follower, followed
            )));
        }
        Ok(())
    }

    // ==================== Post Operations ====================

    pub fn insert_post(&self, post: &Post) -> StoreResult<()> {
        let media_json = serde_json::to_string(&post.media)?;
        self.conn.execute(
            r#"INSERT INTO posts (id, author, body, media, like_count, reply_count, redweet_count,
                is_reply, parent_id, posted_at, last_updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                &post.id,
                &post.author,
                &post.body,
                &media_json,
                post.like_count,
                post.reply_count,
                post.redweet_count,
                post.is_reply,
                &post.parent_id,
                format_datetime(&post.posted_at),
                format_datetime(&post.last_updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        self.find_post(id)?
            .ok_or_else(|| StoreError::NotFound(format!("Post {}", id)))
    }

    pub fn find_post(&self, id: &str) -> StoreResult<Option<Post>> {
        let post = self
            .conn
            .query_row("SELECT * FROM posts WHERE id = ?1", params![id], row_to_post)
            .optional()?;
        Ok(post)
    }

    pub fn post_exists(&self, id: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn update_post_content(
        &self,
        id: &str,
        body: &str,
        media: &[String],
        updated_at: &DateTime<Utc>,
    ) -> StoreResult<()> {
        let media_json = serde_json::to_string(media)?;
        let rows = self.conn.execute(
            "UPDATE posts SET body = ?1, media = ?2, last_updated_at = ?3 WHERE id = ?4",
            params![body, &media_json, format_datetime(updated_at), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        Ok(())
    }

    pub fn delete_post_row(&self, id: &str) -> StoreResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        Ok(())
    }

    pub fn adjust_post_counter(&self, id: &str, counter: PostCounter, delta: i64) -> StoreResult<()> {
        let sql = format!(
            "UPDATE posts SET {col} = {col} + ?1 WHERE id = ?2",
            col = counter.column()
        );
        let rows = self.conn.execute(&sql, params![delta, id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        Ok(())
    }

    /// Ids of the direct replies to a post
    pub fn reply_ids(&self, id: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM posts WHERE parent_id = ?1 ORDER BY posted_at DESC, id DESC")?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn replies(&self, id: &str, offset: usize, limit: Option<usize>) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT * FROM posts WHERE parent_id = ?1
               ORDER BY posted_at DESC, id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let posts = stmt
            .query_map(params![id, sql_limit(limit), sql_offset(offset)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts by one author, newest first
    pub fn posts_by_author(
        &self,
        author: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT * FROM posts WHERE author = ?1
               ORDER BY posted_at DESC, id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let posts = stmt
            .query_map(params![author, sql_limit(limit), sql_offset(offset)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts by everyone `viewer` follows, newest first
    pub fn followed_posts(&self, viewer: &str, limit: Option<usize>) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT * FROM posts
               WHERE author IN (SELECT followed FROM follows WHERE follower = ?1)
               ORDER BY posted_at DESC, id DESC LIMIT ?2"#,
        )?;
        let posts = stmt
            .query_map(params![viewer, sql_limit(limit)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts whose body contains `query`, newest first
    pub fn search_posts(
        &self,
        query: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT * FROM posts WHERE instr(body, ?1) > 0
               ORDER BY posted_at DESC, id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let posts = stmt
            .query_map(params![query, sql_limit(limit), sql_offset(offset)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Whether any remaining post still lists `link` in its media
    pub fn media_in_use(&self, link: &str) -> StoreResult<bool> {
        let in_use: bool = self.conn.query_row(
            r#"SELECT EXISTS(SELECT 1 FROM posts, json_each(posts.media)
               WHERE json_each.value = ?1)"#,
            params![link],
            |row| row.get(0),
        )?;
        Ok(in_use)
    }

    // ==================== Like Operations ====================

    pub fn like_exists(&self, username: &str, post_id: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM likes WHERE username = ?1 AND post_id = ?2)",
            params![username, post_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn insert_like(&self, username: &str, post_id: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO likes (username, post_id, created_at) VALUES (?1, ?2, ?3)",
            params![username, post_id, format_datetime(&now())],
        )?;
        Ok(())
    }

    pub fn delete_like(&self, username: &str, post_id: &str) -> StoreResult<()> {
        let rows = self.conn.execute(
            "DELETE FROM likes WHERE username = ?1 AND post_id = ?2",
            params![username, post_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Like {} -> {}", username, post_id)));
        }
        Ok(())
    }

    /// Remove every like of a post, returning how many were removed
    pub fn delete_likes_of_post(&self, post_id: &str) -> StoreResult<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM likes WHERE post_id = ?1", params![post_id])?;
        Ok(rows)
    }

    /// Users that liked a post, most followed first
    pub fn likers(&self, post_id: &str) -> StoreResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT u.* FROM likes l JOIN users u ON u.username = l.username
               WHERE l.post_id = ?1
               ORDER BY u.follower_count DESC, u.username ASC"#,
        )?;
        let users = stmt
            .query_map(params![post_id], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn liked_posts(
        &self,
        username: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT p.* FROM likes l JOIN posts p ON p.id = l.post_id
               WHERE l.username = ?1
               ORDER BY p.posted_at DESC, p.id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let posts = stmt
            .query_map(params![username, sql_limit(limit), sql_offset(offset)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    // ==================== Redweet Operations ====================

    pub fn find_redweet(&self, author: &str, post_id: &str) -> StoreResult<Option<Redweet>> {
        let redweet = self
            .conn
            .query_row(
                "SELECT * FROM redweets WHERE author = ?1 AND post_id = ?2",
                params![author, post_id],
                row_to_redweet,
            )
            .optional()?;
        Ok(redweet)
    }

    pub fn insert_redweet(&self, redweet: &Redweet) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO redweets (id, author, post_id, redweeted_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                &redweet.id,
                &redweet.author,
                &redweet.post_id,
                format_datetime(&redweet.redweeted_at),
            ],
        )?;
        Ok(())
    }

    pub fn delete_redweet(&self, id: &str) -> StoreResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM redweets WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Redweet {}", id)));
        }
        Ok(())
    }

    pub fn redweets_of_post(&self, post_id: &str) -> StoreResult<Vec<Redweet>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM redweets WHERE post_id = ?1 ORDER BY redweeted_at DESC, id DESC",
        )?;
        let redweets = stmt
            .query_map(params![post_id], row_to_redweet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(redweets)
    }

    pub fn redweets_by_author(&self, author: &str) -> StoreResult<Vec<Redweet>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM redweets WHERE author = ?1 ORDER BY redweeted_at DESC, id DESC",
        )?;
        let redweets = stmt
            .query_map(params![author], row_to_redweet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(redweets)
    }

    /// Redweets by one author joined with the posts they re-share, newest first
    pub fn redweet_events_by_author(
        &self,
        author: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<RedweetEvent>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT r.id AS r_id, r.author AS r_author, r.post_id AS r_post_id,
                      r.redweeted_at AS r_redweeted_at, p.*
               FROM redweets r JOIN posts p ON p.id = r.post_id
               WHERE r.author = ?1
               ORDER BY r.redweeted_at DESC, r.id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let events = stmt
            .query_map(
                params![author, sql_limit(limit), sql_offset(offset)],
                row_to_redweet_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Redweets by everyone `viewer` follows, newest first
    pub fn followed_redweet_events(
        &self,
        viewer: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<RedweetEvent>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT r.id AS r_id, r.author AS r_author, r.post_id AS r_post_id,
                      r.redweeted_at AS r_redweeted_at, p.*
               FROM redweets r JOIN posts p ON p.id = r.post_id
               WHERE r.author IN (SELECT followed FROM follows WHERE follower = ?1)
               ORDER BY r.redweeted_at DESC, r.id DESC LIMIT ?2"#,
        )?;
        let events = stmt
            .query_map(params![viewer, sql_limit(limit)], row_to_redweet_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Users that redweeted a post, most followed first
    pub fn redweeters(&self, post_id: &str) -> StoreResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT u.* FROM redweets r JOIN users u ON u.username = r.author
               WHERE r.post_id = ?1
               ORDER BY u.follower_count DESC, u.username ASC"#,
        )?;
        let users = stmt
            .query_map(params![post_id], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Posts that `username` redweeted, most recent redweet first
    pub fn redweeted_posts(
        &self,
        username: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT p.* FROM redweets r JOIN posts p ON p.id = r.post_id
               WHERE r.author = ?1
               ORDER BY r.redweeted_at DESC, r.id DESC LIMIT ?2 OFFSET ?3"#,
        )?;
        let posts = stmt
            .query_map(params![username, sql_limit(limit), sql_offset(offset)], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    // ==================== Media Release Outbox ====================

    pub fn queue_media_release(&self, link: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO media_releases (link, queued_at) VALUES (?1, ?2)",
            params![link, format_datetime(&now())],
        )?;
        Ok(())
    }

    pub fn pending_media_releases(&self) -> StoreResult<Vec<PendingRelease>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM media_releases ORDER BY queued_at ASC, link ASC")?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingRelease {
                    link: row.get("link")?,
                    queued_at: parse_datetime(row.get::<_, String>("queued_at")?),
                    attempts: row.get("attempts")?,
                    last_error: row.get("last_error")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    pub fn clear_media_release(&self, link: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM media_releases WHERE link = ?1", params![link])?;
        Ok(())
    }

    pub fn record_media_failure(&self, link: &str, error: &str) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE media_releases SET attempts = attempts + 1, last_error = ?1 WHERE link = ?2",
            params![error, link],
        )?;
        Ok(())
    }

    // ==================== Counter Repair ====================

    /// Recompute user counters from follow edges, returning how many rows drifted
    pub fn repair_user_counters(&self) -> StoreResult<usize> {
        let rows = self.conn.execute(
            r#"UPDATE users SET
                   follower_count = (SELECT COUNT(*) FROM follows WHERE followed = users.username),
                   following_count = (SELECT COUNT(*) FROM follows WHERE follower = users.username)
               WHERE follower_count <> (SELECT COUNT(*) FROM follows WHERE followed = users.username)
                  OR following_count <> (SELECT COUNT(*) FROM follows WHERE follower = users.username)"#,
            [],
        )?;
        Ok(rows)
    }

    /// Recompute post counters from likes, replies and redweets, returning how many rows drifted
    pub fn repair_post_counters(&self) -> StoreResult<usize> {
        let rows = self.conn.execute(
            r#"UPDATE posts SET
                   like_count = (SELECT COUNT(*) FROM likes WHERE post_id = posts.id),
                   reply_count = (SELECT COUNT(*) FROM posts c WHERE c.parent_id = posts.id),
                   redweet_count = (SELECT COUNT(*) FROM redweets WHERE post_id = posts.id)
               WHERE like_count <> (SELECT COUNT(*) FROM likes WHERE post_id = posts.id)
                  OR reply_count <> (SELECT COUNT(*) FROM posts c WHERE c.parent_id = posts.id)
                  OR redweet_count <> (SELECT COUNT(*) FROM redweets WHERE post_id = posts.id)"#,
            [],
        )?;
        Ok(rows)
    }
}

/// A media link whose blob still has to be deleted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRelease {
    pub link: String,
    pub queued_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        username: row.get("username")?,
        name: row.get("name")?,
        email: row.get("email")?,
        bio: row.get("bio")?,
        pfp_url: row.get("pfp_url")?,
        follower_count: row.get("follower_count")?,
        following_count: row.get("following_count")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let media_str: String = row.get("media")?;
    let media: Vec<String> = serde_json::from_str(&media_str).unwrap_or_default();

    Ok(Post {
        id: row.get("id")?,
        author: row.get("author")?,
        body: row.get("body")?,
        media,
        like_count: row.get("like_count")?,
        reply_count: row.get("reply_count")?,
        redweet_count: row.get("redweet_count")?,
        is_reply: row.get("is_reply")?,
        parent_id: row.get("parent_id")?,
        posted_at: parse_datetime(row.get::<_, String>("posted_at")?),
        last_updated_at: parse_datetime(row.get::<_, String>("last_updated_at")?),
    })
}

fn row_to_redweet(row: &rusqlite::Row) -> rusqlite::Result<Redweet> {
    Ok(Redweet {
        id: row.get("id")?,
        author: row.get("author")?,
        post_id: row.get("post_id")?,
        redweeted_at: parse_datetime(row.get::<_, String>("redweeted_at")?),
    })
}

fn row_to_redweet_event(row: &rusqlite::Row) -> rusqlite::Result<RedweetEvent> {
    Ok(RedweetEvent {
        redweet: Redweet {
            id: row.get("r_id")?,
            author: row.get("r_author")?,
            post_id: row.get("r_post_id")?,
            redweeted_at: parse_datetime(row.get::<_, String>("r_redweeted_at")?),
        },
        original: row_to_post(row)?,
    })
}

/// SQLite treats a negative LIMIT as "no limit"
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Fixed-width so that text order matches time order
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
