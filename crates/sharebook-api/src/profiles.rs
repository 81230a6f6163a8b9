use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use sharebook_db::Database;
use sharebook_types::api::ProfileUpdate;
use sharebook_types::models::{USERS, UserProfile};

use crate::auth::CurrentSession;
use crate::client::blocking;
use crate::error::{Error, Result};
use crate::media::{MediaClient, MediaKind};

/// Shown as a book's owner when the owner has no profile.
pub const UNKNOWN_USER: &str = "Unknown User";

/// User profiles. Reads are open to anyone; writes always target the
/// signed-in user's own profile.
#[derive(Clone)]
pub struct Profiles {
    db: Arc<Database>,
    media: MediaClient,
    session: CurrentSession,
}

impl Profiles {
    pub(crate) fn new(db: Arc<Database>, media: MediaClient, session: CurrentSession) -> Self {
        Self { db, media, session }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let db = self.db.clone();
        let doc = blocking(move || db.get(USERS, &user_id.to_string())).await?;

        match doc {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Write only the fields present in `update` to the signed-in user's
    /// profile. Changing `email` here does not change the address used to
    /// sign in.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<()> {
        let user_id = self.session.user_id()?;
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Validation("Name cannot be empty".into()));
        }

        let patch = serde_json::to_value(&update).map_err(anyhow::Error::from)?;
        if patch.as_object().is_none_or(|fields| fields.is_empty()) {
            return Ok(());
        }

        self.patch(user_id, patch).await?;
        info!("Profile {} updated", user_id);
        Ok(())
    }

    /// Upload `image` and make it the signed-in user's avatar. Returns the
    /// new URL.
    pub async fn set_avatar(&self, image: &Path) -> Result<String> {
        let user_id = self.session.user_id()?;
        if self.get_user(user_id).await?.is_none() {
            return Err(Error::NotFound(format!("User {}", user_id)));
        }

        let url = self.media.upload_file(image, MediaKind::Avatar).await?;
        self.patch(user_id, json!({ "avatar": url })).await?;

        info!("Profile {} has a new avatar", user_id);
        Ok(url)
    }

    /// The name stamped on a user's listings.
    pub(crate) async fn display_name(&self, user_id: Uuid) -> Result<String> {
        Ok(self
            .get_user(user_id)
            .await?
            .map(|profile| profile.name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_USER.to_string()))
    }

    async fn patch(&self, user_id: Uuid, patch: Value) -> Result<()> {
        let db = self.db.clone();
        let id = user_id.to_string();
        let updated = blocking(move || db.update_many(USERS, &[id], patch)).await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }
}
