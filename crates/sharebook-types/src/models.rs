use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection names used in the document store.
pub const MESSAGES: &str = "messages";
pub const BOOKS: &str = "books";
pub const USERS: &str = "users";

/// Categories offered when listing a book.
pub const BOOK_CATEGORIES: [&str; 8] = [
    "Fiction",
    "Non-Fiction",
    "Science",
    "History",
    "Biography",
    "Educational",
    "Self-Help",
    "Other",
];

/// A direct message between exactly two users.
///
/// `participants` is stored as the ordered pair `[sender_id, receiver_id]`
/// but compared as a set when selecting a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub text: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub participants: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// True when this message belongs to the conversation between `a` and `b`,
    /// regardless of who sent it.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        let involves = |id: Uuid| self.participants.contains(&id);
        involves(a)
            && involves(b)
            && self.participants.iter().all(|p| *p == a || *p == b)
    }

    /// The participant that is not `me`. For a message someone sent to
    /// themselves this is `me` again.
    pub fn counterpart(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    #[default]
    Good,
    Used,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub category: String,
    pub description: String,
    pub condition: Condition,
    pub cover_image: Option<String>,
    pub pdf_file: Option<String>,
    pub is_available: bool,
    pub location: String,
    pub user_id: Uuid,
    pub username: String,
}

impl Book {
    /// Case-insensitive substring match on title or author.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        needle.is_empty()
            || self.title.to_lowercase().contains(&needle)
            || self.author.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub location: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub avatar: Option<String>,
}
