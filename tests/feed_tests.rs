use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use dwitter_graph::feed::{merge_by_time, merge_page, window, Page};
use dwitter_graph::models::{FeedItem, Post, Redweet, RedweetEvent, User};
use dwitter_graph::store::{Store, StoreError};
use dwitter_graph::views::GraphReader;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn post_at(n: usize, secs: i64) -> Post {
    let mut post = Post::new(format!("p{:09}", n), "alice", "body");
    post.posted_at = base() + Duration::seconds(secs);
    post.last_updated_at = post.posted_at;
    post
}

fn redweet_at(n: usize, secs: i64, original: &Post) -> RedweetEvent {
    RedweetEvent {
        redweet: Redweet {
            id: format!("r{:09}", n),
            author: "bob".to_string(),
            post_id: original.id.clone(),
            redweeted_at: base() + Duration::seconds(secs),
        },
        original: original.clone(),
    }
}

/// Newest-first timestamps, ties allowed
fn desc(mut secs: Vec<i64>) -> Vec<i64> {
    secs.sort_unstable_by(|a, b| b.cmp(a));
    secs
}

fn sources(post_secs: &[i64], redweet_secs: &[i64]) -> (Vec<Post>, Vec<RedweetEvent>) {
    let posts: Vec<Post> = post_secs
        .iter()
        .enumerate()
        .map(|(i, s)| post_at(i, *s))
        .collect();
    let original = post_at(999_999, 0);
    let redweets = redweet_secs
        .iter()
        .enumerate()
        .map(|(i, s)| redweet_at(i, *s, &original))
        .collect();
    (posts, redweets)
}

fn bounded<T>(items: &[T], page: Page) -> Vec<T>
where
    T: Clone,
{
    match page.source_bound() {
        Some(bound) => items.iter().take(bound).cloned().collect(),
        None => items.to_vec(),
    }
}

// ==================== Merge Order ====================

#[test]
fn test_merged_feed_is_newest_first() {
    let (posts, redweets) = sources(&desc(vec![9, 7, 7, 2]), &desc(vec![8, 7, 1]));
    let merged = merge_by_time(posts, redweets);

    assert_eq!(merged.len(), 7);
    for pair in merged.windows(2) {
        assert!(pair[0].timestamp() >= pair[1].timestamp());
    }
    // Posts precede redweets at the shared 7s mark
    let kinds: Vec<bool> = merged
        .iter()
        .filter(|item| item.timestamp() == base() + Duration::seconds(7))
        .map(|item| matches!(item, FeedItem::Post(_)))
        .collect();
    assert_eq!(kinds, vec![true, true, false]);
}

#[test]
fn test_offset_past_end_is_empty() {
    let (posts, redweets) = sources(&[3, 2], &[1]);
    let page = Page::new(5, 10).unwrap();
    assert!(merge_page(posts, redweets, page).is_empty());
}

// ==================== Window Properties ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_bounded_sources_match_unbounded_merge(
        post_secs in prop::collection::vec(0i64..2_000, 0..500),
        redweet_secs in prop::collection::vec(0i64..2_000, 0..500),
        offset in 0i64..1_100,
        limit in -1i64..600,
    ) {
        let (posts, redweets) = sources(&desc(post_secs), &desc(redweet_secs));
        let page = Page::new(offset, limit).unwrap();

        let reference = window(merge_by_time(posts.clone(), redweets.clone()), page.offset, page.limit);
        let windowed = merge_page(bounded(&posts, page), bounded(&redweets, page), page);

        prop_assert_eq!(windowed, reference);
    }
}

// ==================== Store-Bounded Sources ====================

/// Helper to fill a store where `viewer` follows alice and bob, who redweet carol
fn seeded_store(post_secs: &[i64], redweet_secs: &[i64]) -> Arc<Store> {
    let store = Arc::new(Store::new(":memory:").unwrap());
    for name in ["viewer", "alice", "bob", "carol"] {
        store
            .create_user(&mut User::new(name, name, format!("{}@test.com", name)))
            .unwrap();
    }

    store
        .with_transaction(|tx| {
            tx.insert_follow("viewer", "alice")?;
            tx.insert_follow("viewer", "bob")?;
            for (i, secs) in post_secs.iter().enumerate() {
                let author = if i % 2 == 0 { "alice" } else { "bob" };
                tx.insert_post(&post_at_by(i, *secs, author))?;
            }
            for (i, secs) in redweet_secs.iter().enumerate() {
                let mut original = post_at_by(i, -1, "carol");
                original.id = format!("o{:09}", i);
                tx.insert_post(&original)?;

                let mut event = redweet_at(i, *secs, &original);
                event.redweet.author = if i % 2 == 0 { "bob" } else { "alice" }.to_string();
                tx.insert_redweet(&event.redweet)?;
            }
            Ok::<_, StoreError>(())
        })
        .unwrap();
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_home_feed_windows_match_unbounded_reference(
        post_secs in prop::collection::vec(0i64..1_000, 0..500),
        redweet_secs in prop::collection::vec(0i64..1_000, 0..500),
        windows in prop::collection::vec((0i64..1_100, -1i64..300), 1..6),
    ) {
        let store = seeded_store(&post_secs, &redweet_secs);
        let reader = GraphReader::new(store);
        let everything = reader.home_feed("viewer", Page::all()).unwrap();
        prop_assert_eq!(everything.len(), post_secs.len() + redweet_secs.len());

        for (offset, limit) in windows {
            let page = Page::new(offset, limit).unwrap();
            let feed = reader.home_feed("viewer", page).unwrap();
            prop_assert_eq!(feed, window(everything.clone(), page.offset, page.limit));
        }
    }
}

#[test]
fn test_home_feed_excludes_unfollowed_authors() {
    let store = seeded_store(&[5, 4, 3], &[2]);
    store
        .create_user(&mut User::new("zed", "zed", "zed@test.com"))
        .unwrap();
    store
        .with_transaction(|tx| tx.insert_post(&post_at_by(7, 10, "zed")))
        .unwrap();

    let feed = GraphReader::new(store).home_feed("viewer", Page::all()).unwrap();

    assert_eq!(feed.len(), 4);
    assert!(feed.iter().all(|entry| match &entry.item {
        FeedItem::Post(p) => p.author != "zed",
        FeedItem::Redweet(e) => e.redweet.author != "zed",
    }));
}

fn post_at_by(n: usize, secs: i64, author: &str) -> Post {
    let mut post = post_at(n, secs);
    post.author = author.to_string();
    post
}
