use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use sharebook_db::{Database, Direction, Query, server_timestamp};
use sharebook_gateway::{Dispatcher, Subscription};
use sharebook_types::models::{MESSAGES, Message};

use crate::client::{blocking, decode_all, parse_id};
use crate::error::{Error, Result};

/// Direct messages between two users, with live conversation and unread
/// views.
#[derive(Clone)]
pub struct Messages {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl Messages {
    pub(crate) fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Store a new unread message and return its id. The timestamp is taken
    /// from the store clock, not the caller's.
    pub async fn send(&self, text: &str, sender_id: Uuid, receiver_id: Uuid) -> Result<Uuid> {
        if text.trim().is_empty() {
            return Err(Error::Validation("Message text cannot be empty".into()));
        }
        if sender_id == receiver_id {
            return Err(Error::Validation("Cannot send a message to yourself".into()));
        }

        let body = json!({
            "text": text,
            "senderId": sender_id,
            "receiverId": receiver_id,
            "participants": [sender_id, receiver_id],
            "timestamp": server_timestamp(),
            "read": false,
        });

        let db = self.db.clone();
        let id = blocking(move || db.add(MESSAGES, body)).await?;
        debug!("Message {} sent from {} to {}", id, sender_id, receiver_id);

        Ok(parse_id(&id)?)
    }

    /// Live view of the conversation between `current_user` and `other_user`,
    /// oldest first. Emits the current state first, then again after every
    /// change to the message collection.
    pub fn subscribe_conversation(
        &self,
        current_user: Uuid,
        other_user: Uuid,
    ) -> Subscription<Vec<Message>> {
        // The store can only filter on one side of the pair; the other side
        // is matched here.
        let query = Query::collection(MESSAGES)
            .where_array_contains("participants", current_user.to_string())
            .order_by("timestamp", Direction::Asc);

        self.dispatcher.watch(query, move |docs| {
            let messages: Vec<Message> = decode_all(&docs)?;
            Ok(messages
                .into_iter()
                .filter(|m| m.is_between(current_user, other_user))
                .collect())
        })
    }

    /// Live view of every unread message addressed to `current_user`, from
    /// any sender, oldest first.
    pub fn subscribe_unread(&self, current_user: Uuid) -> Subscription<Vec<Message>> {
        let query = Query::collection(MESSAGES)
            .where_eq("receiverId", current_user.to_string())
            .where_eq("read", false)
            .order_by("timestamp", Direction::Asc);

        self.dispatcher.watch(query, |docs| decode_all(&docs))
    }

    /// Mark everything `other_user` sent to `current_user` as read, in a
    /// single transaction. Returns how many messages this call changed;
    /// zero means nothing was written.
    pub async fn mark_read(&self, current_user: Uuid, other_user: Uuid) -> Result<usize> {
        let unread = Query::collection(MESSAGES)
            .where_eq("receiverId", current_user.to_string())
            .where_eq("senderId", other_user.to_string())
            .where_eq("read", false);

        let db = self.db.clone();
        let updated = blocking(move || db.update_matching(&unread, json!({ "read": true }))).await?;

        if updated > 0 {
            debug!("{} marked {} message(s) from {} read", current_user, updated, other_user);
        }
        Ok(updated)
    }

    /// Everyone `current_user` has exchanged messages with, most recent
    /// conversation first.
    pub async fn conversation_partners(&self, current_user: Uuid) -> Result<Vec<Uuid>> {
        let db = self.db.clone();
        let docs = blocking(move || {
            db.run_query(
                &Query::collection(MESSAGES)
                    .where_array_contains("participants", current_user.to_string())
                    .order_by("timestamp", Direction::Desc),
            )
        })
        .await?;

        let messages: Vec<Message> = decode_all(&docs)?;
        let mut partners = Vec::new();
        for message in &messages {
            let partner = message.counterpart(current_user);
            if !partners.contains(&partner) {
                partners.push(partner);
            }
        }
        Ok(partners)
    }
}
