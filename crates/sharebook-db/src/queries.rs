use crate::models::{CredentialRow, Document};
use crate::query::Query;
use crate::Database;
use anyhow::{Result, anyhow, bail};
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use sharebook_types::events::{ChangeEvent, ChangeKind};

const SERVER_VALUE_KEY: &str = "$serverValue";

/// Placeholder that the store replaces with its own clock at write time.
pub fn server_timestamp() -> Value {
    let mut sentinel = Map::new();
    sentinel.insert(SERVER_VALUE_KEY.to_string(), Value::String("timestamp".to_string()));
    Value::Object(sentinel)
}

fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get(SERVER_VALUE_KEY))
        .and_then(Value::as_str)
        == Some("timestamp")
}

impl Database {
    // -- Documents --

    /// Insert a document under a generated id and return the id.
    pub fn add(&self, collection: &str, data: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let data = self.prepare_write(data)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                (collection, &id, Value::Object(data).to_string()),
            )?;
            Ok(())
        })?;

        debug!("Added {}/{}", collection, id);
        self.publish(vec![ChangeEvent::new(collection, &id, ChangeKind::Added)]);
        Ok(id)
    }

    /// Create or overwrite a document. With `merge`, top-level fields of an
    /// existing document that `data` does not mention are kept.
    pub fn set(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<()> {
        let data = self.prepare_write(data)?;

        let existed = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_document(&tx, collection, id)?;
            let existed = existing.is_some();

            let body = match existing {
                Some(mut doc) if merge => {
                    doc.data.extend(data);
                    doc.data
                }
                _ => data,
            };

            tx.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id)
                 DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
                (collection, id, Value::Object(body).to_string()),
            )?;
            tx.commit()?;
            Ok(existed)
        })?;

        let kind = if existed { ChangeKind::Modified } else { ChangeKind::Added };
        self.publish(vec![ChangeEvent::new(collection, id, kind)]);
        Ok(())
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| query_document(conn, collection, id))
    }

    /// Shallow-merge `patch` into an existing document. Fails if the document
    /// does not exist.
    pub fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let updated = self.update_many(collection, &[id.to_string()], patch)?;
        if updated == 0 {
            bail!("No document {}/{}", collection, id);
        }
        Ok(())
    }

    /// Apply the same patch to every listed document in one transaction.
    /// Ids that do not exist are skipped. Returns how many were updated.
    pub fn update_many(&self, collection: &str, ids: &[String], patch: Value) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let patch = self.prepare_write(patch)?;

        let updated = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut docs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(doc) = query_document(&tx, collection, id)? {
                    docs.push(doc);
                }
            }

            let updated = patch_documents(&tx, docs, &patch)?;
            tx.commit()?;
            Ok(updated)
        })?;

        self.publish_modified(collection, &updated);
        Ok(updated.len())
    }

    /// Patch every document matching `query`. Selection and update share
    /// one transaction, so a document is only counted by the call that
    /// actually changed it.
    pub fn update_matching(&self, query: &Query, patch: Value) -> Result<usize> {
        let patch = self.prepare_write(patch)?;

        let updated = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let docs = select_documents(&tx, query)?;
            let updated = patch_documents(&tx, docs, &patch)?;
            tx.commit()?;
            Ok(updated)
        })?;

        self.publish_modified(query.collection_name(), &updated);
        Ok(updated.len())
    }

    fn publish_modified(&self, collection: &str, ids: &[String]) {
        debug!("Updated {} document(s) in {}", ids.len(), collection);
        self.publish(
            ids.iter()
                .map(|id| ChangeEvent::new(collection, id, ChangeKind::Modified))
                .collect(),
        );
    }

    /// Returns false when there was nothing to delete.
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                (collection, id),
            )?;
            Ok(n > 0)
        })?;

        if removed {
            debug!("Removed {}/{}", collection, id);
            self.publish(vec![ChangeEvent::new(collection, id, ChangeKind::Removed)]);
        }
        Ok(removed)
    }

    pub fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        self.with_conn(|conn| select_documents(conn, query))
    }

    /// Validate a write body and resolve server timestamp placeholders.
    fn prepare_write(&self, data: Value) -> Result<Map<String, Value>> {
        let Value::Object(mut data) = data else {
            bail!("Document body must be a JSON object");
        };

        if data.values().any(is_server_timestamp) {
            let now = Value::String(self.next_timestamp()?);
            for value in data.values_mut().filter(|v| is_server_timestamp(v)) {
                *value = now.clone();
            }
        }

        Ok(data)
    }

    // -- Credentials --

    /// Create the credential row and the profile document `profile_collection/user_id`
    /// in one transaction. Returns false, writing nothing, when the email is
    /// already registered.
    pub fn create_account(
        &self,
        user_id: &str,
        email: &str,
        password_hash: &str,
        profile_collection: &str,
        profile: Value,
    ) -> Result<bool> {
        let profile = self.prepare_write(profile)?;

        let created = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if query_credentials(&tx, email)?.is_some() {
                return Ok(false);
            }

            let inserted = tx.execute(
                "INSERT INTO credentials (user_id, email, password) VALUES (?1, ?2, ?3)",
                (user_id, email, password_hash),
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }

            tx.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                (profile_collection, user_id, Value::Object(profile).to_string()),
            )?;
            tx.commit()?;
            Ok(true)
        })?;

        if created {
            debug!("Created account {}", user_id);
            self.publish(vec![ChangeEvent::new(profile_collection, user_id, ChangeKind::Added)]);
        }
        Ok(created)
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| query_credentials(conn, email))
    }

    pub fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE credentials SET password = ?1 WHERE user_id = ?2",
                (password_hash, user_id),
            )?;
            if n == 0 {
                return Err(anyhow!("No credentials for user {}", user_id));
            }
            Ok(())
        })
    }

    // -- Password resets --

    pub fn insert_password_reset(&self, token_hash: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (token_hash, user_id, expires_at),
            )?;
            Ok(())
        })
    }

    /// Mark a reset token used and return its user id, but only if it is
    /// unused and `expires_at` is later than `now`. Both timestamps are
    /// RFC 3339 strings in UTC so they compare as text.
    pub fn consume_password_reset(&self, token_hash: &str, now: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user_id: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM password_resets
                     WHERE token_hash = ?1 AND used = 0 AND expires_at > ?2",
                    (token_hash, now),
                    |row| row.get(0),
                )
                .optional()?;

            if user_id.is_some() {
                tx.execute(
                    "UPDATE password_resets SET used = 1 WHERE token_hash = ?1",
                    [token_hash],
                )?;
            }
            tx.commit()?;
            Ok(user_id)
        })
    }
}

fn query_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            (collection, id),
            |row| row.get(0),
        )
        .optional()?;

    data.map(|data| parse_document(collection, id.to_string(), &data))
        .transpose()
}

fn select_documents(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
    let (sql, params) = query.to_sql();
    let collection = query.collection_name();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, data)| parse_document(collection, id, &data))
        .collect()
}

/// Shallow-merge `patch` into each document and write it back. Returns the
/// ids written.
fn patch_documents(
    conn: &Connection,
    docs: Vec<Document>,
    patch: &Map<String, Value>,
) -> Result<Vec<String>> {
    let mut updated = Vec::with_capacity(docs.len());

    for mut doc in docs {
        doc.data.extend(patch.clone());
        conn.execute(
            "UPDATE documents SET data = ?1, updated_at = datetime('now')
             WHERE collection = ?2 AND id = ?3",
            (Value::Object(doc.data).to_string(), &doc.collection, &doc.id),
        )?;
        updated.push(doc.id);
    }

    Ok(updated)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_document(collection: &str, id: String, data: &str) -> Result<Document> {
    match serde_json::from_str(data) {
        Ok(Value::Object(data)) => Ok(Document {
            collection: collection.to_string(),
            id,
            data,
        }),
        Ok(_) => Err(anyhow!("Document {}/{} is not an object", collection, id)),
        Err(e) => Err(anyhow!("Corrupt document {}/{}: {}", collection, id, e)),
    }
}

fn query_credentials(conn: &Connection, email: &str) -> Result<Option<CredentialRow>> {
    let mut stmt =
        conn.prepare("SELECT user_id, email, password, created_at FROM credentials WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(CredentialRow {
                user_id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
