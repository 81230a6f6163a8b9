use std::sync::Arc;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use sharebook_db::{Database, Document};
use sharebook_gateway::Dispatcher;

use crate::auth::{Auth, CurrentSession, LogMailer, ResetMailer};
use crate::books::Books;
use crate::config::Config;
use crate::error::Result;
use crate::media::MediaClient;
use crate::messages::Messages;
use crate::profiles::Profiles;

/// Entry point for every ShareBook operation. Owns the store, the live query
/// dispatcher, the media client and the signed-in session. Cheap to clone.
#[derive(Clone)]
pub struct ShareBook {
    inner: Arc<ShareBookInner>,
}

struct ShareBookInner {
    dispatcher: Dispatcher,
    auth: Auth,
    messages: Messages,
    books: Books,
    profiles: Profiles,
    media: MediaClient,
}

impl ShareBook {
    /// Open (or create) the store at `config.db_path`.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        info!("Store opened at {}", config.db_path.display());
        Ok(Self::new(config, db, Arc::new(LogMailer)))
    }

    /// A throwaway store, mostly for tests.
    pub fn in_memory(config: Config) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::new(config, db, Arc::new(LogMailer)))
    }

    pub fn new(config: Config, db: Database, mailer: Arc<dyn ResetMailer>) -> Self {
        let db = Arc::new(db);
        let dispatcher = Dispatcher::new(db.clone());
        let media = MediaClient::new(config.media.clone());
        let session = CurrentSession::default();
        let profiles = Profiles::new(db.clone(), media.clone(), session.clone());

        Self {
            inner: Arc::new(ShareBookInner {
                auth: Auth::new(
                    db.clone(),
                    config.jwt_secret.clone(),
                    config.reset_ttl,
                    mailer,
                    session.clone(),
                ),
                messages: Messages::new(db.clone(), dispatcher.clone()),
                books: Books::new(db, dispatcher.clone(), media.clone(), profiles.clone(), session),
                profiles,
                media,
                dispatcher,
            }),
        }
    }

    pub fn auth(&self) -> &Auth {
        &self.inner.auth
    }

    pub fn messages(&self) -> &Messages {
        &self.inner.messages
    }

    pub fn books(&self) -> &Books {
        &self.inner.books
    }

    pub fn profiles(&self) -> &Profiles {
        &self.inner.profiles
    }

    pub fn media(&self) -> &MediaClient {
        &self.inner.media
    }

    /// Number of live subscriptions still running.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.dispatcher.active()
    }

    /// Sign out and stop every live subscription.
    pub async fn shutdown(&self) {
        self.inner.auth.logout();
        self.inner.dispatcher.shutdown().await;
        info!("ShareBook client shut down");
    }
}

/// Run a store call on the blocking pool.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow!("store task failed: {}", e)
        })??;
    Ok(value)
}

pub(crate) fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> anyhow::Result<Vec<T>> {
    docs.iter().map(Document::decode::<T>).collect()
}

/// Store ids are UUID strings; anything else means a corrupt document.
pub(crate) fn parse_id(id: &str) -> anyhow::Result<uuid::Uuid> {
    id.parse().map_err(|e| anyhow!("invalid document id {}: {}", id, e))
}
