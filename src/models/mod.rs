use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// User is identified by username; counters are caches of the follow edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub pfp_url: String,
    pub follower_count: i64,
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh user with zeroed counters, ready for `Store::create_user`
    pub fn new(username: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
            email: email.into(),
            bio: String::new(),
            pfp_url: String::new(),
            follower_count: 0,
            following_count: 0,
            created_at: now(),
        }
    }
}

/// Post ("dweet"). Replies are posts with `is_reply` set and a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: String,
    pub body: String,
    pub media: Vec<String>,
    pub like_count: i64,
    pub reply_count: i64,
    pub redweet_count: i64,
    pub is_reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Post {
    pub fn new(id: impl Into<String>, author: impl Into<String>, body: impl Into<String>) -> Self {
        let posted_at = now();
        Self {
            id: id.into(),
            author: author.into(),
            body: body.into(),
            media: Vec::new(),
            like_count: 0,
            reply_count: 0,
            redweet_count: 0,
            is_reply: false,
            parent_id: None,
            posted_at,
            last_updated_at: posted_at,
        }
    }
}

/// Redweet is a re-share event, one per (author, post) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redweet {
    pub id: String,
    pub author: String,
    pub post_id: String,
    pub redweeted_at: DateTime<Utc>,
}

/// A redweet together with the post it re-shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedweetEvent {
    pub redweet: Redweet,
    pub original: Post,
}

/// Anything that can appear on a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItem {
    Post(Post),
    Redweet(RedweetEvent),
}

impl FeedItem {
    /// The instant this item entered the feed
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FeedItem::Post(post) => post.posted_at,
            FeedItem::Redweet(event) => event.redweet.redweeted_at,
        }
    }

    /// The post shown by this item; a redweet shows the post it re-shares
    pub fn post(&self) -> &Post {
        match self {
            FeedItem::Post(post) => post,
            FeedItem::Redweet(event) => &event.original,
        }
    }
}

/// The link tables whose rows carry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// source follows target (both usernames)
    Follow,
    /// source likes target (username -> post id)
    Like,
    /// source redweets target (username -> post id)
    Redweet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn is_present(self) -> bool {
        matches!(self, Presence::Present)
    }
}

impl From<bool> for Presence {
    fn from(present: bool) -> Self {
        if present {
            Presence::Present
        } else {
            Presence::Absent
        }
    }
}

/// Denormalized counters on a user row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCounter {
    Followers,
    Following,
}

impl UserCounter {
    pub(crate) fn column(self) -> &'static str {
        match self {
            UserCounter::Followers => "follower_count",
            UserCounter::Following => "following_count",
        }
    }
}

/// Denormalized counters on a post row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCounter {
    Likes,
    Replies,
    Redweets,
}

impl PostCounter {
    pub(crate) fn column(self) -> &'static str {
        match self {
            PostCounter::Likes => "like_count",
            PostCounter::Replies => "reply_count",
            PostCounter::Redweets => "redweet_count",
        }
    }
}

/// What a profile lists alongside the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileContent {
    /// Authored posts and redweets merged by time
    Feed,
    Dweets,
    Redweets,
    /// The posts this user redweeted
    RedweetedDweets,
    Liked,
}

/// Current time at the precision the store persists
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
