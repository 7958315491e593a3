//! Feed merging and pagination
//!
//! Posts and redweet events come from separate sources, each already sorted
//! newest first. They are merged with a two-pointer walk and then windowed.
//! A source only ever needs its first `offset + limit` items: every item in the
//! first `offset + limit` merged positions is within that prefix of its own source.

use std::iter::Peekable;

use crate::error::{GraphError, GraphResult};
use crate::models::{FeedItem, Post, RedweetEvent};

/// An offset/limit window. `limit: None` means everything from `offset` on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    /// A negative offset is rejected; a negative limit means "no limit"
    pub fn new(offset: i64, limit: i64) -> GraphResult<Self> {
        let offset = usize::try_from(offset)
            .map_err(|_| GraphError::Validation(format!("negative offset {}", offset)))?;
        let limit = usize::try_from(limit).ok();
        Ok(Self { offset, limit })
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }

    /// How many items each merged source must supply for this window
    pub fn source_bound(&self) -> Option<usize> {
        self.limit.map(|limit| self.offset.saturating_add(limit))
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        window(items, self.offset, self.limit)
    }
}

/// Items `offset..offset + limit`; empty when `offset` is past the end
pub fn window<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let rest = items.into_iter().skip(offset);
    match limit {
        Some(limit) => rest.take(limit).collect(),
        None => rest.collect(),
    }
}

/// Merge two newest-first sources into one newest-first feed.
/// On equal timestamps the post comes before the redweet event.
pub fn merge_by_time(posts: Vec<Post>, redweets: Vec<RedweetEvent>) -> Vec<FeedItem> {
    let mut merged = Vec::with_capacity(posts.len() + redweets.len());
    let mut posts = posts.into_iter().peekable();
    let mut redweets = redweets.into_iter().peekable();

    loop {
        let take_post = match (posts.peek(), redweets.peek()) {
            (Some(post), Some(event)) => post.posted_at >= event.redweet.redweeted_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_post {
            push_next(&mut merged, &mut posts, FeedItem::Post);
        } else {
            push_next(&mut merged, &mut redweets, FeedItem::Redweet);
        }
    }

    merged
}

fn push_next<I, T>(merged: &mut Vec<FeedItem>, source: &mut Peekable<I>, wrap: fn(T) -> FeedItem)
where
    I: Iterator<Item = T>,
{
    if let Some(item) = source.next() {
        merged.push(wrap(item));
    }
}

/// Merge then window
pub fn merge_page(posts: Vec<Post>, redweets: Vec<RedweetEvent>, page: Page) -> Vec<FeedItem> {
    page.apply(merge_by_time(posts, redweets))
}
