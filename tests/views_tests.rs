use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use dwitter_graph::error::GraphError;
use dwitter_graph::feed::Page;
use dwitter_graph::media::{BlobStore, MediaError, MediaReleaser, MediaResult};
use dwitter_graph::models::{FeedItem, Post, ProfileContent, User};
use dwitter_graph::posts::PostService;
use dwitter_graph::relations::RelationMutator;
use dwitter_graph::store::Store;
use dwitter_graph::views::{FeedEntry, GraphReader};

/// Blob store for tests that never touch media
struct NoBlobs;

impl BlobStore for NoBlobs {
    fn resolve_location(&self, link: &str) -> MediaResult<String> {
        Err(MediaError::InvalidLink(link.to_string()))
    }

    fn delete(&self, location: &str) -> MediaResult<()> {
        Err(MediaError::NotFound(location.to_string()))
    }
}

struct Fixture {
    store: Arc<Store>,
    relations: RelationMutator,
    posts: PostService,
    reader: GraphReader,
}

/// Helper to create the users viewer, alice, bob and carol
fn fixture() -> Fixture {
    let store = Arc::new(Store::new(":memory:").unwrap());
    for name in ["viewer", "alice", "bob", "carol"] {
        store
            .create_user(&mut User::new(name, name, format!("{}@test.com", name)))
            .unwrap();
    }
    let media = MediaReleaser::new(store.clone(), Arc::new(NoBlobs));
    Fixture {
        relations: RelationMutator::new(store.clone()),
        posts: PostService::new(store.clone(), media),
        reader: GraphReader::new(store.clone()),
        store,
    }
}

/// Helper to insert a post with a fixed timestamp
fn insert_post_at(store: &Store, id: &str, author: &str, secs: i64) -> Post {
    let mut post = Post::new(id, author, format!("{} at {}", author, secs));
    post.posted_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs);
    post.last_updated_at = post.posted_at;
    store.with_transaction(|tx| tx.insert_post(&post)).unwrap();
    post
}

fn names(users: &[User]) -> Vec<&str> {
    users.iter().map(|u| u.username.as_str()).collect()
}

fn item_ids(items: &[FeedEntry]) -> Vec<String> {
    items
        .iter()
        .map(|entry| match &entry.item {
            FeedItem::Post(p) => p.id.clone(),
            FeedItem::Redweet(e) => format!("rw:{}", e.redweet.post_id),
        })
        .collect()
}

// ==================== Post View ====================

#[test]
fn test_post_view_known_likers_and_redweeters() {
    let f = fixture();
    let post = f.posts.publish_post("carol", "popular", vec![]).unwrap();
    f.relations.follow("viewer", "alice").unwrap();
    for liker in ["alice", "bob", "viewer"] {
        f.relations.like(liker, &post.id).unwrap();
    }
    f.relations.redweet("bob", &post.id).unwrap();
    f.relations.redweet("viewer", &post.id).unwrap();

    let view = f.reader.post_view(&post.id, Some("viewer"), Page::all()).unwrap();

    assert_eq!(view.post.like_count, 3);
    assert_eq!(names(&view.known_likers), vec!["alice", "viewer"]);
    assert_eq!(names(&view.known_redweeters), vec!["viewer"]);
    assert!(view.parent.is_none());

    let anonymous = f.reader.post_view(&post.id, None, Page::all()).unwrap();
    assert!(anonymous.known_likers.is_empty());
    assert!(anonymous.known_redweeters.is_empty());
}

#[test]
fn test_post_view_replies_window_and_parent() {
    let f = fixture();
    let root = f.posts.publish_post("alice", "root", vec![]).unwrap();
    let mut replies = Vec::new();
    for author in ["bob", "carol", "viewer"] {
        replies.push(f.posts.publish_reply(&root.id, author, "re", vec![]).unwrap());
    }

    let view = f.reader.post_view(&root.id, None, Page::new(0, 2).unwrap()).unwrap();
    assert_eq!(view.post.reply_count, 3);
    assert_eq!(view.replies.len(), 2);

    let rest = f.reader.post_view(&root.id, None, Page::new(2, -1).unwrap()).unwrap();
    assert_eq!(rest.replies.len(), 1);

    let child = f.reader.post_view(&replies[0].id, None, Page::all()).unwrap();
    assert_eq!(child.parent.map(|p| p.id), Some(root.id));
}

// ==================== User View ====================

#[test]
fn test_user_view_profile_contents() {
    let f = fixture();
    insert_post_at(&f.store, "alicepost1", "alice", 10);
    insert_post_at(&f.store, "alicepost2", "alice", 20);
    insert_post_at(&f.store, "carolpost1", "carol", 5);
    f.relations.redweet("alice", "carolpost1").unwrap();
    f.relations.like("alice", "carolpost1").unwrap();
    f.relations.follow("viewer", "alice").unwrap();
    f.relations.follow("bob", "alice").unwrap();

    let view = |content, page| {
        f.reader
            .user_view("alice", Some("viewer"), content, page)
            .unwrap()
    };

    let feed = view(ProfileContent::Feed, Page::all());
    assert_eq!(feed.user.follower_count, 2);
    assert_eq!(names(&feed.known_followers), vec!["viewer"]);
    assert!(feed.known_following.is_empty());
    assert_eq!(
        item_ids(&feed.items),
        vec!["rw:carolpost1", "alicepost2", "alicepost1"]
    );

    let second = view(ProfileContent::Feed, Page::new(1, 1).unwrap());
    assert_eq!(item_ids(&second.items), vec!["alicepost2"]);

    let dweets = view(ProfileContent::Dweets, Page::all());
    assert_eq!(item_ids(&dweets.items), vec!["alicepost2", "alicepost1"]);

    let redweets = view(ProfileContent::Redweets, Page::all());
    assert_eq!(item_ids(&redweets.items), vec!["rw:carolpost1"]);

    let redweeted = view(ProfileContent::RedweetedDweets, Page::all());
    assert_eq!(item_ids(&redweeted.items), vec!["carolpost1"]);

    let liked = view(ProfileContent::Liked, Page::all());
    assert_eq!(item_ids(&liked.items), vec!["carolpost1"]);
}

#[test]
fn test_user_view_unknown_user_is_not_found() {
    let f = fixture();
    let result = f
        .reader
        .user_view("ghost", Some("viewer"), ProfileContent::Feed, Page::all());
    assert!(matches!(result, Err(GraphError::NotFound(_))));
}

// ==================== Follower Activity ====================

#[test]
fn test_followers_and_following_with_activity() {
    let f = fixture();
    insert_post_at(&f.store, "bobpost001", "bob", 30);
    insert_post_at(&f.store, "bobpost002", "bob", 40);
    insert_post_at(&f.store, "alicepost1", "alice", 50);
    f.relations.follow("viewer", "alice").unwrap();
    f.relations.follow("bob", "alice").unwrap();
    f.relations.follow("alice", "bob").unwrap();

    let followers = f
        .reader
        .followers_with_activity(
            "alice",
            Some("viewer"),
            Page::all(),
            ProfileContent::Dweets,
            Page::new(0, 1).unwrap(),
        )
        .unwrap();

    assert_eq!(followers.len(), 2);
    let bob = followers.iter().find(|a| a.user.username == "bob").unwrap();
    let viewer = followers.iter().find(|a| a.user.username == "viewer").unwrap();
    assert!(!bob.known);
    assert!(viewer.known);
    assert_eq!(item_ids(&bob.items), vec!["bobpost002"]);
    assert!(viewer.items.is_empty());

    let following = f
        .reader
        .following_with_activity(
            "viewer",
            Some("viewer"),
            Page::all(),
            ProfileContent::Feed,
            Page::all(),
        )
        .unwrap();
    assert_eq!(following.len(), 1);
    assert_eq!(following[0].user.username, "alice");
    assert!(following[0].known);
    assert_eq!(item_ids(&following[0].items), vec!["alicepost1"]);
}

// ==================== Home Feed & Likes ====================

#[test]
fn test_home_feed_merges_followed_posts_and_redweets() {
    let f = fixture();
    insert_post_at(&f.store, "alicepost1", "alice", 10);
    insert_post_at(&f.store, "carolpost1", "carol", 20);
    insert_post_at(&f.store, "bobpost001", "bob", 30);
    f.relations.follow("viewer", "alice").unwrap();
    f.relations.follow("viewer", "bob").unwrap();
    f.relations.redweet("alice", "carolpost1").unwrap();

    let feed = f.reader.home_feed("viewer", Page::all()).unwrap();
    assert_eq!(
        item_ids(&feed),
        vec!["rw:carolpost1", "bobpost001", "alicepost1"]
    );

    let tail = f.reader.home_feed("viewer", Page::new(2, 5).unwrap()).unwrap();
    assert_eq!(item_ids(&tail), vec!["alicepost1"]);

    assert!(matches!(
        f.reader.home_feed("ghost", Page::all()),
        Err(GraphError::NotFound(_))
    ));
}

#[test]
fn test_liked_posts() {
    let f = fixture();
    insert_post_at(&f.store, "older00001", "bob", 1);
    insert_post_at(&f.store, "newer00001", "carol", 2);
    f.relations.like("alice", "older00001").unwrap();
    f.relations.like("alice", "newer00001").unwrap();

    let liked = f.reader.liked_posts("alice", Some("alice"), Page::all()).unwrap();
    assert_eq!(item_ids(&liked), vec!["newer00001", "older00001"]);
    assert_eq!(names(&liked[0].known_likers), vec!["alice"]);

    let second = f
        .reader
        .liked_posts("alice", None, Page::new(1, 1).unwrap())
        .unwrap();
    assert_eq!(item_ids(&second), vec!["older00001"]);
    assert!(second[0].known_likers.is_empty());
    assert!(matches!(
        f.reader.liked_posts("ghost", None, Page::all()),
        Err(GraphError::NotFound(_))
    ));
}

// ==================== Per-Item Personalization ====================

#[test]
fn test_feed_entries_carry_known_likers_and_redweeters() {
    let f = fixture();
    insert_post_at(&f.store, "carolpost1", "carol", 10);
    insert_post_at(&f.store, "alicepost1", "alice", 20);
    f.relations.follow("viewer", "alice").unwrap();
    f.relations.follow("viewer", "bob").unwrap();
    f.relations.redweet("alice", "carolpost1").unwrap();
    f.relations.redweet("carol", "carolpost1").unwrap();
    f.relations.like("bob", "carolpost1").unwrap();
    f.relations.like("carol", "carolpost1").unwrap();
    f.relations.like("viewer", "alicepost1").unwrap();

    let feed = f.reader.home_feed("viewer", Page::all()).unwrap();

    assert_eq!(item_ids(&feed), vec!["rw:carolpost1", "alicepost1"]);
    // The redweet shows the likers and redweeters of carol's post
    assert_eq!(names(&feed[0].known_likers), vec!["bob"]);
    assert_eq!(names(&feed[0].known_redweeters), vec!["alice"]);
    assert_eq!(names(&feed[1].known_likers), vec!["viewer"]);
    assert!(feed[1].known_redweeters.is_empty());

    let profile = f
        .reader
        .user_view("carol", Some("viewer"), ProfileContent::Dweets, Page::all())
        .unwrap();
    assert_eq!(names(&profile.items[0].known_likers), vec!["bob"]);

    let anonymous = f
        .reader
        .user_view("carol", None, ProfileContent::Dweets, Page::all())
        .unwrap();
    assert!(anonymous.items[0].known_likers.is_empty());
    assert!(anonymous.items[0].known_redweeters.is_empty());

    let followers = f
        .reader
        .followers_with_activity(
            "alice",
            Some("viewer"),
            Page::all(),
            ProfileContent::Redweets,
            Page::all(),
        )
        .unwrap();
    assert_eq!(followers.len(), 1);
    assert!(followers[0].known);
    assert!(followers[0].items.is_empty());

    let following = f
        .reader
        .following_with_activity(
            "viewer",
            Some("viewer"),
            Page::all(),
            ProfileContent::Redweets,
            Page::all(),
        )
        .unwrap();
    let alice = following.iter().find(|a| a.user.username == "alice").unwrap();
    assert_eq!(names(&alice.items[0].known_likers), vec!["bob"]);
}

// ==================== Search ====================

#[test]
fn test_search_posts_personalized_and_windowed() {
    let f = fixture();
    insert_post_at(&f.store, "rustpost01", "alice", 10);
    insert_post_at(&f.store, "rustpost02", "bob", 20);
    insert_post_at(&f.store, "otherpost1", "carol", 30);
    f.store
        .with_transaction(|tx| tx.update_post_content("rustpost01", "learning rust", &[], &Utc::now()))
        .unwrap();
    f.store
        .with_transaction(|tx| tx.update_post_content("rustpost02", "rust again", &[], &Utc::now()))
        .unwrap();
    f.relations.follow("viewer", "carol").unwrap();
    f.relations.like("carol", "rustpost01").unwrap();

    let hits = f.reader.search_posts("rust", Some("viewer"), Page::all()).unwrap();
    assert_eq!(item_ids(&hits), vec!["rustpost02", "rustpost01"]);
    assert_eq!(names(&hits[1].known_likers), vec!["carol"]);

    let second = f.reader.search_posts("rust", None, Page::new(1, 5).unwrap()).unwrap();
    assert_eq!(item_ids(&second), vec!["rustpost01"]);

    assert!(matches!(
        f.reader.search_posts("  ", None, Page::all()),
        Err(GraphError::Validation(_))
    ));
}

#[test]
fn test_search_users_with_known_followers() {
    let f = fixture();
    f.store
        .create_user(&mut User::new("carolyn", "Carolyn", "carolyn@test.com"))
        .unwrap();
    insert_post_at(&f.store, "carolpost1", "carol", 10);
    f.relations.follow("viewer", "alice").unwrap();
    f.relations.follow("alice", "carol").unwrap();
    f.relations.follow("bob", "carol").unwrap();

    let users = f
        .reader
        .search_users(
            "carol",
            Some("viewer"),
            Page::all(),
            ProfileContent::Dweets,
            Page::all(),
        )
        .unwrap();

    let found: Vec<&str> = users.iter().map(|v| v.user.username.as_str()).collect();
    assert_eq!(found, vec!["carol", "carolyn"]);
    assert_eq!(names(&users[0].known_followers), vec!["alice"]);
    assert_eq!(item_ids(&users[0].items), vec!["carolpost1"]);
    assert!(users[1].items.is_empty());

    let first = f
        .reader
        .search_users("carol", None, Page::new(0, 1).unwrap(), ProfileContent::Feed, Page::all())
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].known_followers.is_empty());
}

// ==================== Publishing ====================

#[test]
fn test_publish_validation_and_missing_parent() {
    let f = fixture();

    assert!(matches!(
        f.posts.publish_post("alice", "   ", vec![]),
        Err(GraphError::Validation(_))
    ));
    assert!(matches!(
        f.posts.publish_post("ghost", "hello", vec![]),
        Err(GraphError::NotFound(_))
    ));

    let result = f.posts.publish_reply("missing001", "alice", "hello?", vec![]);
    assert!(matches!(result, Err(GraphError::NotFound(_))));
    assert_eq!(f.store.stats().unwrap().posts, 0);

    let post = f.posts.publish_post("alice", "hello", vec![]).unwrap();
    assert_eq!(post.id.len(), 10);
    assert_eq!(f.store.get_post(&post.id).unwrap(), post);
}
