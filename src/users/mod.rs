//! Account creation and profile edits

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::feed::Page;
use crate::models::*;
use crate::store::Store;
use crate::validate;
use crate::views::{GraphReader, UserView};

/// Editable profile fields; every field is replaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub bio: String,
    pub pfp_url: String,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<Store>,
    reader: GraphReader,
}

impl UserService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            reader: GraphReader::new(store.clone()),
            store,
        }
    }

    /// Register a new user with zeroed counters
    pub fn sign_up(&self, username: &str, name: &str, email: &str, bio: &str) -> GraphResult<User> {
        validate::username(username)?;
        validate::display_name(name)?;
        validate::email(email)?;
        validate::bio(bio)?;

        let mut user = User::new(username, name, email);
        user.bio = bio.to_string();

        self.store.with_transaction(|tx| -> GraphResult<()> {
            if tx.user_exists(username)? {
                return Err(GraphError::Validation(format!("username {} is taken", username)));
            }
            if tx.email_taken(email, None)? {
                return Err(GraphError::Validation(format!("email {} is taken", email)));
            }
            tx.insert_user(&user)?;
            Ok(())
        })?;

        log::info!("Signed up user {}", username);
        Ok(user)
    }

    /// Replace the profile of `username` and return their profile as they see it
    pub fn update_user(
        &self,
        username: &str,
        update: &ProfileUpdate,
        content: ProfileContent,
        page: Page,
    ) -> GraphResult<UserView> {
        validate::username(username)?;
        validate::display_name(&update.name)?;
        validate::email(&update.email)?;
        validate::bio(&update.bio)?;
        validate::pfp_url(&update.pfp_url)?;

        self.store.with_transaction(|tx| -> GraphResult<()> {
            tx.get_user(username)?;
            if tx.email_taken(&update.email, Some(username))? {
                return Err(GraphError::Validation(format!(
                    "email {} is taken",
                    update.email
                )));
            }
            tx.update_user_profile(
                username,
                &update.name,
                &update.email,
                &update.bio,
                &update.pfp_url,
            )?;
            Ok(())
        })?;

        log::info!("Updated profile of {}", username);
        self.reader.user_view(username, Some(username), content, page)
    }
}
