use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::media::{MediaRelease, MediaReleaser};
use crate::models::*;
use crate::relations::link_reply;
use crate::store::{Store, StoreError, StoreTx};
use crate::validate::{self, POST_ID_LEN};

/// Random ids are tried this many times before giving up
const ID_ATTEMPTS: usize = 16;

/// Result of an edit: the updated post and what happened to the media it dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostEdit {
    pub post: Post,
    pub media: MediaRelease,
}

/// Publishing and editing posts
#[derive(Clone)]
pub struct PostService {
    store: Arc<Store>,
    media: MediaReleaser,
}

impl PostService {
    pub fn new(store: Arc<Store>, media: MediaReleaser) -> Self {
        Self { store, media }
    }

    pub fn publish_post(&self, author: &str, body: &str, media: Vec<String>) -> GraphResult<Post> {
        validate::username(author)?;
        validate::content(body, &media)?;

        let post = self.store.with_transaction(|tx| -> GraphResult<Post> {
            tx.get_user(author)?;
            let mut post = Post::new(generate_post_id(tx)?, author, body);
            post.media = media;
            tx.insert_post(&post)?;
            reclaim_media(tx, &post.media)?;
            Ok(post)
        })?;

        log::info!("Published post {} by {}", post.id, author);
        Ok(post)
    }

    /// Publish a reply to `parent_id`; the parent's reply count moves with it
    pub fn publish_reply(
        &self,
        parent_id: &str,
        author: &str,
        body: &str,
        media: Vec<String>,
    ) -> GraphResult<Post> {
        validate::post_id(parent_id)?;
        validate::username(author)?;
        validate::content(body, &media)?;

        let reply = self.store.with_transaction(|tx| -> GraphResult<Post> {
            tx.get_user(author)?;
            let mut reply = Post::new(generate_post_id(tx)?, author, body);
            reply.media = media;
            reply.is_reply = true;
            reply.parent_id = Some(parent_id.to_string());
            link_reply(tx, &reply)?;
            reclaim_media(tx, &reply.media)?;
            Ok(reply)
        })?;

        log::info!("Published reply {} to {} by {}", reply.id, parent_id, author);
        Ok(reply)
    }

    /// Replace body and media of a post. Only its author may edit it; media links
    /// the edit drops are released once no post references them.
    pub fn update_post(
        &self,
        post_id: &str,
        editor: &str,
        body: &str,
        media: Vec<String>,
    ) -> GraphResult<PostEdit> {
        validate::post_id(post_id)?;
        validate::username(editor)?;
        validate::content(body, &media)?;

        let (post, dropped) = self.store.with_transaction(|tx| -> GraphResult<(Post, Vec<String>)> {
            let current = tx.get_post(post_id)?;
            if current.author != editor {
                return Err(GraphError::Unauthorized(format!(
                    "{} is not the author of {}",
                    editor, post_id
                )));
            }

            tx.update_post_content(post_id, body, &media, &now())?;
            reclaim_media(tx, &media)?;

            let kept: HashSet<&String> = media.iter().collect();
            let mut dropped = Vec::new();
            for link in current.media {
                if kept.contains(&link) || dropped.contains(&link) || tx.media_in_use(&link)? {
                    continue;
                }
                tx.queue_media_release(&link)?;
                dropped.push(link);
            }

            Ok((tx.get_post(post_id)?, dropped))
        })?;

        log::info!("Updated post {} ({} media dropped)", post_id, dropped.len());
        let media = self.media.release(&dropped);
        Ok(PostEdit { post, media })
    }
}

/// Links a post references are no longer up for release
fn reclaim_media(tx: &StoreTx<'_>, links: &[String]) -> GraphResult<()> {
    for link in links {
        tx.clear_media_release(link)?;
    }
    Ok(())
}

fn generate_post_id(tx: &StoreTx<'_>) -> GraphResult<String> {
    let mut rng = rand::thread_rng();
    for _ in 0..ID_ATTEMPTS {
        let id: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(POST_ID_LEN)
            .map(char::from)
            .collect();
        if !tx.post_exists(&id)? {
            return Ok(id);
        }
        log::debug!("Post id {} already taken, retrying", id);
    }
    Err(StoreError::Conflict(format!(
        "no free post id after {} attempts",
        ID_ATTEMPTS
    ))
    .into())
}
