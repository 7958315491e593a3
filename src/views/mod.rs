//! Personalized read paths: post detail, profiles, the home feed,
//! follower/following activity and search. Each view is read from one store
//! snapshot, and every post it shows carries the likers and redweeters the
//! viewer knows.

use serde::Serialize;
use std::sync::Arc;

use crate::error::GraphResult;
use crate::feed::{merge_page, Page};
use crate::intersect::{intersect, KnownSet};
use crate::models::*;
use crate::store::{Store, StoreResult, StoreTx};
use crate::validate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub post: Post,
    /// The post this one replies to, when it still exists
    pub parent: Option<Post>,
    pub replies: Vec<Post>,
    pub known_likers: Vec<User>,
    pub known_redweeters: Vec<User>,
}

/// A feed item personalized for the viewer. For a redweet the likers and
/// redweeters are those of the re-shared post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub item: FeedItem,
    pub known_likers: Vec<User>,
    pub known_redweeters: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub user: User,
    pub known_followers: Vec<User>,
    pub known_following: Vec<User>,
    pub items: Vec<FeedEntry>,
}

/// One user of a follower/following list with their own windowed items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserActivity {
    pub user: User,
    /// Whether the viewer knows this user
    pub known: bool,
    pub items: Vec<FeedEntry>,
}

#[derive(Clone)]
pub struct GraphReader {
    store: Arc<Store>,
}

impl GraphReader {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn post_view(
        &self,
        post_id: &str,
        viewer: Option<&str>,
        replies_page: Page,
    ) -> GraphResult<PostView> {
        validate::post_id(post_id)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<PostView> {
            let post = tx.get_post(post_id)?;
            let parent = match &post.parent_id {
                Some(parent_id) => tx.find_post(parent_id)?,
                None => None,
            };
            let replies = tx.replies(post_id, replies_page.offset, replies_page.limit)?;

            let known = known_set(tx, viewer)?;
            let known_likers = intersect(&tx.likers(post_id)?, &known);
            let known_redweeters = intersect(&tx.redweeters(post_id)?, &known);

            Ok(PostView {
                post,
                parent,
                replies,
                known_likers,
                known_redweeters,
            })
        })
    }

    pub fn user_view(
        &self,
        username: &str,
        viewer: Option<&str>,
        content: ProfileContent,
        page: Page,
    ) -> GraphResult<UserView> {
        validate::username(username)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<UserView> {
            let user = tx.get_user(username)?;
            let known = known_set(tx, viewer)?;
            user_view_in(tx, user, &known, content, page)
        })
    }

    /// Posts and redweets of everyone `viewer` follows, newest first
    pub fn home_feed(&self, viewer: &str, page: Page) -> GraphResult<Vec<FeedEntry>> {
        validate::username(viewer)?;

        self.store.read(|tx| -> GraphResult<Vec<FeedEntry>> {
            tx.get_user(viewer)?;
            let known = known_set(tx, Some(viewer))?;
            let bound = page.source_bound();
            let posts = tx.followed_posts(viewer, bound)?;
            let redweets = tx.followed_redweet_events(viewer, bound)?;
            annotate(tx, merge_page(posts, redweets, page), &known)
        })
    }

    /// Followers of `username`, each with a window of their own profile items
    pub fn followers_with_activity(
        &self,
        username: &str,
        viewer: Option<&str>,
        users_page: Page,
        content: ProfileContent,
        items_page: Page,
    ) -> GraphResult<Vec<UserActivity>> {
        self.with_activity(username, viewer, users_page, content, items_page, |tx, page| {
            tx.followers(username, page.offset, page.limit)
        })
    }

    /// Users `username` follows, each with a window of their own profile items
    pub fn following_with_activity(
        &self,
        username: &str,
        viewer: Option<&str>,
        users_page: Page,
        content: ProfileContent,
        items_page: Page,
    ) -> GraphResult<Vec<UserActivity>> {
        self.with_activity(username, viewer, users_page, content, items_page, |tx, page| {
            tx.following(username, page.offset, page.limit)
        })
    }

    /// Posts `username` liked, most recent like first
    pub fn liked_posts(
        &self,
        username: &str,
        viewer: Option<&str>,
        page: Page,
    ) -> GraphResult<Vec<FeedEntry>> {
        validate::username(username)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<Vec<FeedEntry>> {
            tx.get_user(username)?;
            let known = known_set(tx, viewer)?;
            let posts = tx.liked_posts(username, page.offset, page.limit)?;
            annotate(tx, posts.into_iter().map(FeedItem::Post).collect(), &known)
        })
    }

    /// Posts whose body contains `query`, newest first
    pub fn search_posts(
        &self,
        query: &str,
        viewer: Option<&str>,
        page: Page,
    ) -> GraphResult<Vec<FeedEntry>> {
        validate::search_query(query)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<Vec<FeedEntry>> {
            let known = known_set(tx, viewer)?;
            let posts = tx.search_posts(query, page.offset, page.limit)?;
            annotate(tx, posts.into_iter().map(FeedItem::Post).collect(), &known)
        })
    }

    /// Users whose username contains `query`, most followed first, each with
    /// the followers and following the viewer knows and a window of profile items
    pub fn search_users(
        &self,
        query: &str,
        viewer: Option<&str>,
        users_page: Page,
        content: ProfileContent,
        items_page: Page,
    ) -> GraphResult<Vec<UserView>> {
        validate::search_query(query)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<Vec<UserView>> {
            let known = known_set(tx, viewer)?;
            tx.search_users(query, users_page.offset, users_page.limit)?
                .into_iter()
                .map(|user| user_view_in(tx, user, &known, content, items_page))
                .collect()
        })
    }

    fn with_activity<F>(
        &self,
        username: &str,
        viewer: Option<&str>,
        users_page: Page,
        content: ProfileContent,
        items_page: Page,
        list: F,
    ) -> GraphResult<Vec<UserActivity>>
    where
        F: FnOnce(&StoreTx<'_>, Page) -> StoreResult<Vec<User>>,
    {
        validate::username(username)?;
        if let Some(viewer) = viewer {
            validate::username(viewer)?;
        }

        self.store.read(|tx| -> GraphResult<Vec<UserActivity>> {
            tx.get_user(username)?;
            let known = known_set(tx, viewer)?;

            list(tx, users_page)?
                .into_iter()
                .map(|user| -> GraphResult<UserActivity> {
                    let items = profile_items(tx, &user.username, content, items_page)?;
                    let items = annotate(tx, items, &known)?;
                    Ok(UserActivity {
                        known: known.contains(&user.username),
                        user,
                        items,
                    })
                })
                .collect()
        })
    }
}

fn known_set(tx: &StoreTx<'_>, viewer: Option<&str>) -> GraphResult<KnownSet> {
    match viewer {
        Some(viewer) => Ok(KnownSet::for_viewer(viewer, &tx.following(viewer, 0, None)?)),
        None => Ok(KnownSet::anonymous()),
    }
}

fn user_view_in(
    tx: &StoreTx<'_>,
    user: User,
    known: &KnownSet,
    content: ProfileContent,
    page: Page,
) -> GraphResult<UserView> {
    let known_followers = intersect(&tx.followers(&user.username, 0, None)?, known);
    let known_following = intersect(&tx.following(&user.username, 0, None)?, known);
    let items = profile_items(tx, &user.username, content, page)?;
    let items = annotate(tx, items, known)?;

    Ok(UserView {
        user,
        known_followers,
        known_following,
        items,
    })
}

fn annotate(tx: &StoreTx<'_>, items: Vec<FeedItem>, known: &KnownSet) -> GraphResult<Vec<FeedEntry>> {
    items
        .into_iter()
        .map(|item| -> GraphResult<FeedEntry> {
            // Nobody to find for an anonymous viewer
            if known.is_empty() {
                return Ok(FeedEntry {
                    item,
                    known_likers: Vec::new(),
                    known_redweeters: Vec::new(),
                });
            }
            let post_id = &item.post().id;
            let known_likers = intersect(&tx.likers(post_id)?, known);
            let known_redweeters = intersect(&tx.redweeters(post_id)?, known);
            Ok(FeedEntry {
                item,
                known_likers,
                known_redweeters,
            })
        })
        .collect()
}

fn profile_items(
    tx: &StoreTx<'_>,
    username: &str,
    content: ProfileContent,
    page: Page,
) -> GraphResult<Vec<FeedItem>> {
    let items = match content {
        ProfileContent::Feed => {
            let bound = page.source_bound();
            let posts = tx.posts_by_author(username, 0, bound)?;
            let redweets = tx.redweet_events_by_author(username, 0, bound)?;
            merge_page(posts, redweets, page)
        }
        ProfileContent::Dweets => tx
            .posts_by_author(username, page.offset, page.limit)?
            .into_iter()
            .map(FeedItem::Post)
            .collect(),
        ProfileContent::Redweets => tx
            .redweet_events_by_author(username, page.offset, page.limit)?
            .into_iter()
            .map(FeedItem::Redweet)
            .collect(),
        ProfileContent::RedweetedDweets => tx
            .redweeted_posts(username, page.offset, page.limit)?
            .into_iter()
            .map(FeedItem::Post)
            .collect(),
        ProfileContent::Liked => tx
            .liked_posts(username, page.offset, page.limit)?
            .into_iter()
            .map(FeedItem::Post)
            .collect(),
    };
    Ok(items)
}
