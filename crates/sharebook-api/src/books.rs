use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use sharebook_db::{Database, Query};
use sharebook_gateway::{Dispatcher, Subscription};
use sharebook_types::api::BookDraft;
use sharebook_types::models::{BOOKS, Book};

use crate::auth::CurrentSession;
use crate::client::{blocking, decode_all, parse_id};
use crate::error::{Error, Result};
use crate::media::{MediaClient, MediaKind};
use crate::profiles::Profiles;

/// Book listings: create, edit, browse and search. Every write acts as the
/// signed-in user.
#[derive(Clone)]
pub struct Books {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    media: MediaClient,
    profiles: Profiles,
    session: CurrentSession,
}

/// URLs produced by one save, kept so a failed write can report them.
#[derive(Default)]
struct Uploaded {
    cover_image: Option<String>,
    pdf_file: Option<String>,
}

impl Uploaded {
    fn log_orphans(&self, book: &str) {
        for url in [&self.cover_image, &self.pdf_file].into_iter().flatten() {
            warn!("Write for book {} failed; {} is left orphaned", book, url);
        }
    }
}

impl Books {
    pub(crate) fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        media: MediaClient,
        profiles: Profiles,
        session: CurrentSession,
    ) -> Self {
        Self {
            db,
            dispatcher,
            media,
            profiles,
            session,
        }
    }

    /// Upload the draft's files and list the book under the signed-in user.
    pub async fn save_book(&self, draft: BookDraft) -> Result<Uuid> {
        validate(&draft)?;
        let owner = self.session.user_id()?;
        let username = self.profiles.display_name(owner).await?;

        let uploaded = self.upload(&draft).await?;
        let book = to_book(&draft, &uploaded, owner, username);

        // Nothing after the upload may fail without reporting the orphans.
        let db = self.db.clone();
        let written = blocking(move || db.add(BOOKS, serde_json::to_value(&book)?)).await;
        let id = match written {
            Ok(id) => id,
            Err(e) => {
                uploaded.log_orphans(&draft.title);
                return Err(e);
            }
        };

        info!("Book {} listed by {}", id, owner);
        Ok(parse_id(&id)?)
    }

    /// Replace a listing's fields. Files not given in `draft` keep their
    /// existing URLs.
    pub async fn update_book(&self, book_id: Uuid, draft: BookDraft) -> Result<()> {
        validate(&draft)?;
        let (owner, existing) = self.owned_book(book_id).await?;
        let username = self.profiles.display_name(owner).await?;

        let mut uploaded = self.upload(&draft).await?;
        let fresh = Uploaded {
            cover_image: uploaded.cover_image.clone(),
            pdf_file: uploaded.pdf_file.clone(),
        };
        uploaded.cover_image = uploaded.cover_image.or(existing.cover_image);
        uploaded.pdf_file = uploaded.pdf_file.or(existing.pdf_file);

        let book = to_book(&draft, &uploaded, owner, username);
        let written: Result<()> = async {
            let body = serde_json::to_value(&book).map_err(anyhow::Error::from)?;
            self.patch(book_id, body).await
        }
        .await;

        match written {
            Ok(()) => {
                info!("Book {} updated", book_id);
                Ok(())
            }
            Err(e) => {
                fresh.log_orphans(&book_id.to_string());
                Err(e)
            }
        }
    }

    pub async fn set_availability(&self, book_id: Uuid, available: bool) -> Result<()> {
        self.owned_book(book_id).await?;
        self.patch(book_id, json!({ "isAvailable": available })).await?;

        info!("Book {} is now {}", book_id, if available { "available" } else { "unavailable" });
        Ok(())
    }

    pub async fn delete_book(&self, book_id: Uuid) -> Result<()> {
        let (owner, _) = self.owned_book(book_id).await?;

        let db = self.db.clone();
        let removed = blocking(move || db.delete(BOOKS, &book_id.to_string())).await?;
        if !removed {
            return Err(Error::NotFound(format!("Book {}", book_id)));
        }

        info!("Book {} deleted by {}", book_id, owner);
        Ok(())
    }

    pub async fn get_book(&self, book_id: Uuid) -> Result<Book> {
        let db = self.db.clone();
        let doc = blocking(move || db.get(BOOKS, &book_id.to_string())).await?;

        match doc {
            Some(doc) => Ok(doc.decode()?),
            None => Err(Error::NotFound(format!("Book {}", book_id))),
        }
    }

    /// Every listing, in the order they were created.
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        let db = self.db.clone();
        let docs = blocking(move || db.run_query(&Query::collection(BOOKS))).await?;
        Ok(decode_all(&docs)?)
    }

    /// Case-insensitive match on title or author. A blank search returns
    /// everything.
    pub async fn search_books(&self, text: &str) -> Result<Vec<Book>> {
        let mut books = self.list_books().await?;
        books.retain(|book| book.matches_search(text));
        Ok(books)
    }

    /// Live view of the listings owned by `owner`.
    pub fn subscribe_owner_books(&self, owner: Uuid) -> Subscription<Vec<Book>> {
        let query = Query::collection(BOOKS).where_eq("userId", owner.to_string());
        self.dispatcher.watch(query, |docs| decode_all(&docs))
    }

    /// Load a book the signed-in user may change, returning that user's id
    /// with it.
    async fn owned_book(&self, book_id: Uuid) -> Result<(Uuid, Book)> {
        let acting = self.session.user_id()?;
        let book = self.get_book(book_id).await?;
        if book.user_id != acting {
            warn!("{} tried to change book {} owned by {}", acting, book_id, book.user_id);
            return Err(Error::Forbidden);
        }
        Ok((acting, book))
    }

    async fn upload(&self, draft: &BookDraft) -> Result<Uploaded> {
        let mut uploaded = Uploaded::default();

        if let Some(path) = &draft.cover_image {
            uploaded.cover_image = Some(self.media.upload_file(path, MediaKind::Cover).await?);
        }
        if let Some(path) = &draft.pdf_file {
            match self.media.upload_file(path, MediaKind::Pdf).await {
                Ok(url) => uploaded.pdf_file = Some(url),
                Err(e) => {
                    uploaded.log_orphans(&draft.title);
                    return Err(e);
                }
            }
        }

        Ok(uploaded)
    }

    async fn patch(&self, book_id: Uuid, patch: serde_json::Value) -> Result<()> {
        let db = self.db.clone();
        let id = book_id.to_string();
        let updated = blocking(move || db.update_many(BOOKS, &[id], patch)).await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Book {}", book_id)));
        }
        Ok(())
    }
}

fn validate(draft: &BookDraft) -> Result<()> {
    let required = [
        ("Title", &draft.title),
        ("Author", &draft.author),
        ("Category", &draft.category),
        ("Description", &draft.description),
        ("Location", &draft.location),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{} is required", field)));
        }
    }
    Ok(())
}

fn to_book(draft: &BookDraft, uploaded: &Uploaded, owner: Uuid, username: String) -> Book {
    Book {
        id: Uuid::nil(),
        title: draft.title.trim().to_string(),
        author: draft.author.trim().to_string(),
        category: draft.category.clone(),
        description: draft.description.trim().to_string(),
        condition: draft.condition,
        cover_image: uploaded.cover_image.clone(),
        pdf_file: uploaded.pdf_file.clone(),
        is_available: draft.is_available,
        location: draft.location.trim().to_string(),
        user_id: owner,
        username,
    }
}
