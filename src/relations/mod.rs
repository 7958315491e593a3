//! Counter-consistent relation mutations
//!
//! Every follow, like and redweet edge has a denormalized counter next to it.
//! Edges and counters change together inside one store transaction, and a
//! mutation whose edge is already in the desired state changes nothing.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{GraphError, GraphResult};
use crate::models::*;
use crate::store::{Store, StoreTx};
use crate::validate;

/// The record whose counter a relation mutation maintains
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum CounterOwner {
    /// The followed user
    User(User),
    /// The liked or redweeted post
    Post(Post),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationOutcome {
    pub owner: CounterOwner,
    /// False when the edge was already in the desired state
    pub changed: bool,
}

/// Rows rewritten by a counter repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub users_repaired: usize,
    pub posts_repaired: usize,
}

/// Idempotent follow/like/redweet mutations with paired counter updates
#[derive(Clone)]
pub struct RelationMutator {
    store: Arc<Store>,
}

impl RelationMutator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Bring the (source, target) edge of `kind` into the `desired` state
    pub fn set_relation(
        &self,
        kind: RelationKind,
        source: &str,
        target: &str,
        desired: Presence,
    ) -> GraphResult<RelationOutcome> {
        validate_edge(kind, source, target)?;
        self.store
            .with_transaction(|tx| apply_relation(tx, kind, source, target, desired))
    }

    /// Returns the followed user with its updated follower count
    pub fn follow(&self, follower: &str, followed: &str) -> GraphResult<User> {
        self.user_edge(follower, followed, Presence::Present)
    }

    pub fn unfollow(&self, follower: &str, followed: &str) -> GraphResult<User> {
        self.user_edge(follower, followed, Presence::Absent)
    }

    /// Returns the liked post with its updated like count
    pub fn like(&self, username: &str, post_id: &str) -> GraphResult<Post> {
        validate_edge(RelationKind::Like, username, post_id)?;
        self.store.with_transaction(|tx| {
            apply_like(tx, username, post_id, Presence::Present).map(|(post, _)| post)
        })
    }

    pub fn unlike(&self, username: &str, post_id: &str) -> GraphResult<Post> {
        validate_edge(RelationKind::Like, username, post_id)?;
        self.store.with_transaction(|tx| {
            apply_like(tx, username, post_id, Presence::Absent).map(|(post, _)| post)
        })
    }

    /// Returns the redweet record, whether it was created now or already existed
    pub fn redweet(&self, author: &str, post_id: &str) -> GraphResult<Redweet> {
        validate_edge(RelationKind::Redweet, author, post_id)?;
        self.store.with_transaction(|tx| {
            apply_redweet(tx, author, post_id, Presence::Present)?;
            tx.find_redweet(author, post_id)?.ok_or_else(|| {
                GraphError::NotFound(format!("Redweet of {} by {}", post_id, author))
            })
        })
    }

    /// Returns the post with its updated redweet count
    pub fn unredweet(&self, author: &str, post_id: &str) -> GraphResult<Post> {
        validate_edge(RelationKind::Redweet, author, post_id)?;
        self.store.with_transaction(|tx| {
            apply_redweet(tx, author, post_id, Presence::Absent).map(|(post, _)| post)
        })
    }

    /// Recompute every counter from the edges it caches
    pub fn repair_counters(&self) -> GraphResult<RepairReport> {
        let report = self.store.with_transaction(|tx| -> GraphResult<RepairReport> {
            Ok(RepairReport {
                users_repaired: tx.repair_user_counters()?,
                posts_repaired: tx.repair_post_counters()?,
            })
        })?;

        if report.users_repaired > 0 || report.posts_repaired > 0 {
            log::warn!(
                "Repaired drifted counters on {} users and {} posts",
                report.users_repaired,
                report.posts_repaired
            );
        }
        Ok(report)
    }

    fn user_edge(&self, follower: &str, followed: &str, desired: Presence) -> GraphResult<User> {
        validate_edge(RelationKind::Follow, follower, followed)?;
        self.store.with_transaction(|tx| {
            apply_follow(tx, follower, followed, desired).map(|(user, _)| user)
        })
    }
}

fn validate_edge(kind: RelationKind, source: &str, target: &str) -> GraphResult<()> {
    validate::username(source)?;
    match kind {
        RelationKind::Follow => {
            validate::username(target)?;
            if source == target {
                return Err(GraphError::Validation(format!(
                    "{} cannot follow themselves",
                    source
                )));
            }
        }
        RelationKind::Like | RelationKind::Redweet => validate::post_id(target)?,
    }
    Ok(())
}

/// Apply one relation mutation inside the caller's transaction
pub fn apply_relation(
    tx: &StoreTx<'_>,
    kind: RelationKind,
    source: &str,
    target: &str,
    desired: Presence,
) -> GraphResult<RelationOutcome> {
    validate_edge(kind, source, target)?;
    let (owner, changed) = match kind {
        RelationKind::Follow => {
            let (user, changed) = apply_follow(tx, source, target, desired)?;
            (CounterOwner::User(user), changed)
        }
        RelationKind::Like => {
            let (post, changed) = apply_like(tx, source, target, desired)?;
            (CounterOwner::Post(post), changed)
        }
        RelationKind::Redweet => {
            let (post, changed) = apply_redweet(tx, source, target, desired)?;
            (CounterOwner::Post(post), changed)
        }
    };
    Ok(RelationOutcome { owner, changed })
}

fn apply_follow(
    tx: &StoreTx<'_>,
    follower: &str,
    followed: &str,
    desired: Presence,
) -> GraphResult<(User, bool)> {
    tx.get_user(follower)?;
    let target = tx.get_user(followed)?;

    if tx.follow_exists(follower, followed)? == desired.is_present() {
        return Ok((target, false));
    }

    let delta = if desired.is_present() {
        tx.insert_follow(follower, followed)?;
        1
    } else {
        tx.delete_follow(follower, followed)?;
        -1
    };
    tx.adjust_user_counter(followed, UserCounter::Followers, delta)?;
    tx.adjust_user_counter(follower, UserCounter::Following, delta)?;

    log::debug!("{} follow {} -> {}", verb(desired), follower, followed);
    Ok((tx.get_user(followed)?, true))
}

fn apply_like(
    tx: &StoreTx<'_>,
    username: &str,
    post_id: &str,
    desired: Presence,
) -> GraphResult<(Post, bool)> {
    tx.get_user(username)?;
    let post = tx.get_post(post_id)?;

    if tx.like_exists(username, post_id)? == desired.is_present() {
        return Ok((post, false));
    }

    let delta = if desired.is_present() {
        tx.insert_like(username, post_id)?;
        1
    } else {
        tx.delete_like(username, post_id)?;
        -1
    };
    tx.adjust_post_counter(post_id, PostCounter::Likes, delta)?;

    log::debug!("{} like {} -> {}", verb(desired), username, post_id);
    Ok((tx.get_post(post_id)?, true))
}

fn apply_redweet(
    tx: &StoreTx<'_>,
    author: &str,
    post_id: &str,
    desired: Presence,
) -> GraphResult<(Post, bool)> {
    tx.get_user(author)?;
    let post = tx.get_post(post_id)?;

    let existing = tx.find_redweet(author, post_id)?;
    if existing.is_some() == desired.is_present() {
        return Ok((post, false));
    }

    let delta = match existing {
        Some(redweet) => {
            tx.delete_redweet(&redweet.id)?;
            -1
        }
        None => {
            tx.insert_redweet(&Redweet {
                id: Uuid::new_v4().to_string(),
                author: author.to_string(),
                post_id: post_id.to_string(),
                redweeted_at: now(),
            })?;
            1
        }
    };
    tx.adjust_post_counter(post_id, PostCounter::Redweets, delta)?;

    log::debug!("{} redweet {} -> {}", verb(desired), author, post_id);
    Ok((tx.get_post(post_id)?, true))
}

/// Insert a reply and count it on its parent, inside the caller's transaction.
/// Returns the parent with its updated reply count.
pub fn link_reply(tx: &StoreTx<'_>, reply: &Post) -> GraphResult<Post> {
    let parent_id = match (&reply.parent_id, reply.is_reply) {
        (Some(parent_id), true) => parent_id,
        _ => {
            return Err(GraphError::Validation(format!(
                "post {} is not a reply",
                reply.id
            )))
        }
    };

    tx.get_post(parent_id)?;
    tx.insert_post(reply)?;
    tx.adjust_post_counter(parent_id, PostCounter::Replies, 1)?;

    Ok(tx.get_post(parent_id)?)
}

fn verb(desired: Presence) -> &'static str {
    if desired.is_present() {
        "Created"
    } else {
        "Removed"
    }
}
