//! Input checks shared by every entry point. They only reject malformed
//! identifiers and out-of-range values; existence is checked against the store.

use crate::error::{GraphError, GraphResult};

pub const POST_ID_LEN: usize = 10;
pub const MAX_USERNAME_LEN: usize = 20;
pub const MAX_BODY_LEN: usize = 240;
pub const MAX_MEDIA: usize = 8;
pub const MAX_NAME_LEN: usize = 80;
pub const MAX_BIO_LEN: usize = 160;
pub const MAX_EMAIL_LEN: usize = 100;

pub fn username(name: &str) -> GraphResult<()> {
    if name.is_empty() || name.len() > MAX_USERNAME_LEN || !is_alphanumeric(name) {
        return Err(GraphError::Validation(format!("invalid username: {:?}", name)));
    }
    Ok(())
}

pub fn post_id(id: &str) -> GraphResult<()> {
    if id.len() != POST_ID_LEN || !is_alphanumeric(id) {
        return Err(GraphError::Validation(format!("invalid post id: {:?}", id)));
    }
    Ok(())
}

/// A post needs a body, media, or both
pub fn content(body: &str, media: &[String]) -> GraphResult<()> {
    if body.chars().count() > MAX_BODY_LEN {
        return Err(GraphError::Validation(format!(
            "body longer than {} characters",
            MAX_BODY_LEN
        )));
    }
    if media.len() > MAX_MEDIA {
        return Err(GraphError::Validation(format!("more than {} media links", MAX_MEDIA)));
    }
    if media.iter().any(|link| link.trim().is_empty()) {
        return Err(GraphError::Validation("empty media link".to_string()));
    }
    if body.trim().is_empty() && media.is_empty() {
        return Err(GraphError::Validation("post needs a body or media".to_string()));
    }
    Ok(())
}

/// Display names are required but free-form
pub fn display_name(name: &str) -> GraphResult<()> {
    if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(GraphError::Validation(format!("invalid name: {:?}", name)));
    }
    Ok(())
}

pub fn bio(bio: &str) -> GraphResult<()> {
    if bio.chars().count() > MAX_BIO_LEN {
        return Err(GraphError::Validation(format!(
            "bio longer than {} characters",
            MAX_BIO_LEN
        )));
    }
    Ok(())
}

/// `local@domain.tld` shape only; deliverability is not checked
pub fn email(email: &str) -> GraphResult<()> {
    let invalid = || GraphError::Validation(format!("invalid email: {:?}", email));

    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if local.is_empty() || host.is_empty() || tld.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    Ok(())
}

/// Empty clears the picture; anything else must be an http(s) link
pub fn pfp_url(url: &str) -> GraphResult<()> {
    if url.is_empty() {
        return Ok(());
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or("");
    if rest.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(GraphError::Validation(format!("invalid picture url: {:?}", url)));
    }
    Ok(())
}

pub fn search_query(query: &str) -> GraphResult<()> {
    if query.trim().is_empty() {
        return Err(GraphError::Validation("empty search query".to_string()));
    }
    Ok(())
}

fn is_alphanumeric(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric())
}
