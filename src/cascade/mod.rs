//! Cascade deletion of posts and users
//!
//! Removing a post removes its whole reply subtree together with every redweet
//! and like of each removed post. The subtree is planned with a worklist and
//! deleted children-first inside one transaction. Media links that no surviving
//! post references are queued in the same transaction and released after commit.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::media::{MediaRelease, MediaReleaser};
use crate::models::*;
use crate::relations::apply_relation;
use crate::store::{Store, StoreTx};
use crate::validate;

/// What a post deletion removed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionReport {
    /// The root post as it was before deletion
    pub post: Post,
    /// Every deleted post id, children before parents
    pub removed: Vec<String>,
    pub media: MediaRelease,
}

/// What a user deletion removed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserDeletionReport {
    pub user: User,
    /// Every deleted post id, the user's own and the replies under them
    pub removed_posts: Vec<String>,
    /// Follow, like and redweet edges of the user removed outside those posts
    pub unlinked: usize,
    pub media: MediaRelease,
}

#[derive(Clone)]
pub struct CascadeDeleter {
    store: Arc<Store>,
    media: MediaReleaser,
}

impl CascadeDeleter {
    pub fn new(store: Arc<Store>, media: MediaReleaser) -> Self {
        Self { store, media }
    }

    pub fn delete_post(&self, post_id: &str) -> GraphResult<DeletionReport> {
        self.delete_post_checked(post_id, None)
    }

    /// Delete a post on behalf of `requester`, who must be its author
    pub fn delete_post_as(&self, post_id: &str, requester: &str) -> GraphResult<DeletionReport> {
        validate::username(requester)?;
        self.delete_post_checked(post_id, Some(requester))
    }

    fn delete_post_checked(
        &self,
        post_id: &str,
        requester: Option<&str>,
    ) -> GraphResult<DeletionReport> {
        validate::post_id(post_id)?;

        let (post, removed, links) = self.store.with_transaction(|tx| {
            let root = tx.get_post(post_id)?;
            if let Some(requester) = requester {
                if root.author != requester {
                    return Err(GraphError::Unauthorized(format!(
                        "{} is not the author of {}",
                        requester, post_id
                    )));
                }
            }

            let mut queued = Vec::new();
            let removed = delete_subtree(tx, post_id, &mut queued)?;
            Ok::<_, GraphError>((root, removed, queued))
        })?;

        log::info!(
            "Deleted post {} and {} dependent posts",
            post_id,
            removed.len() - 1
        );

        let media = self.media.release(&links);
        Ok(DeletionReport {
            post,
            removed,
            media,
        })
    }

    /// Delete a user with every post they authored and every edge they own
    pub fn delete_user(&self, username: &str) -> GraphResult<UserDeletionReport> {
        validate::username(username)?;

        let (user, removed_posts, unlinked, links) = self.store.with_transaction(|tx| {
            let user = tx.get_user(username)?;
            let mut queued = Vec::new();
            let mut removed_posts = Vec::new();

            for post in tx.posts_by_author(username, 0, None)? {
                // An earlier subtree may already have taken this one
                if tx.post_exists(&post.id)? {
                    removed_posts.extend(delete_subtree(tx, &post.id, &mut queued)?);
                }
            }

            let mut unlinked = 0;
            for redweet in tx.redweets_by_author(username)? {
                apply_relation(
                    tx,
                    RelationKind::Redweet,
                    username,
                    &redweet.post_id,
                    Presence::Absent,
                )?;
                unlinked += 1;
            }
            for post in tx.liked_posts(username, 0, None)? {
                apply_relation(tx, RelationKind::Like, username, &post.id, Presence::Absent)?;
                unlinked += 1;
            }
            for followed in tx.following(username, 0, None)? {
                apply_relation(
                    tx,
                    RelationKind::Follow,
                    username,
                    &followed.username,
                    Presence::Absent,
                )?;
                unlinked += 1;
            }
            for follower in tx.followers(username, 0, None)? {
                apply_relation(
                    tx,
                    RelationKind::Follow,
                    &follower.username,
                    username,
                    Presence::Absent,
                )?;
                unlinked += 1;
            }

            tx.delete_user_row(username)?;
            Ok::<_, GraphError>((user, removed_posts, unlinked, queued))
        })?;

        log::info!(
            "Deleted user {} with {} posts and {} edges",
            username,
            removed_posts.len(),
            unlinked
        );

        let media = self.media.release(&links);
        Ok(UserDeletionReport {
            user,
            removed_posts,
            unlinked,
            media,
        })
    }
}

/// Every post in the subtree rooted at `root_id`, each parent before its descendants
pub fn plan(tx: &StoreTx<'_>, root_id: &str) -> GraphResult<Vec<String>> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut work = vec![root_id.to_string()];

    while let Some(id) = work.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        work.extend(tx.reply_ids(&id)?);
        order.push(id);
    }

    Ok(order)
}

/// Delete a planned subtree children-first. Returns the deleted ids in deletion order
/// and appends newly orphaned media links to `queued`.
fn delete_subtree(
    tx: &StoreTx<'_>,
    root_id: &str,
    queued: &mut Vec<String>,
) -> GraphResult<Vec<String>> {
    let order = plan(tx, root_id)?;
    let mut removed = Vec::with_capacity(order.len());

    for id in order.into_iter().rev() {
        let post = tx.get_post(&id)?;

        if let (true, Some(parent_id)) = (post.is_reply, &post.parent_id) {
            if tx.post_exists(parent_id)? {
                tx.adjust_post_counter(parent_id, PostCounter::Replies, -1)?;
            }
        }

        for redweet in tx.redweets_of_post(&id)? {
            tx.delete_redweet(&redweet.id)?;
            tx.adjust_post_counter(&id, PostCounter::Redweets, -1)?;
        }

        let likes = tx.delete_likes_of_post(&id)?;
        tx.delete_post_row(&id)?;
        log::debug!("Removed post {} ({} likes)", id, likes);

        for link in post.media {
            if !tx.media_in_use(&link)? && !queued.contains(&link) {
                tx.queue_media_release(&link)?;
                queued.push(link);
            }
        }

        removed.push(id);
    }

    Ok(removed)
}
