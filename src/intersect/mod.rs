//! "Known to viewer" subsets of a user list
//!
//! The known set of a viewer is the viewer plus everyone the viewer follows.
//! Anonymous viewers know nobody.

use std::collections::HashSet;

use crate::models::User;

/// Usernames a viewer counts as known
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownSet {
    usernames: HashSet<String>,
}

impl KnownSet {
    pub fn for_viewer(viewer: &str, following: &[User]) -> Self {
        let usernames = following
            .iter()
            .map(|u| u.username.clone())
            .chain(std::iter::once(viewer.to_string()))
            .collect();
        Self { usernames }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.usernames.contains(username)
    }

    pub fn len(&self) -> usize {
        self.usernames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usernames.is_empty()
    }
}

/// Members of `candidates` that are known, in candidate order, each user once
pub fn intersect(candidates: &[User], known: &KnownSet) -> Vec<User> {
    let mut seen = HashSet::with_capacity(candidates.len().min(known.len()));
    candidates
        .iter()
        .filter(|u| known.contains(&u.username) && seen.insert(u.username.as_str()))
        .cloned()
        .collect()
}
