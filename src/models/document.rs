use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_status")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Published,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub slug: String,
    pub title: String,
    /// Serialized rich-text payload. Plain text is stored as a JSON string.
    pub content: serde_json::Value,
    pub status: DocumentStatus,
    /// Public visibility requires status == Published AND published == true.
    /// Both flags are kept; neither is authoritative on its own.
    pub published: bool,
    /// Size of the serialized content, counted against the storage quota.
    pub content_bytes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Document {
    /// The publication gate. Servable to the public only when both the
    /// status enum and the boolean flag agree.
    pub fn is_publicly_visible(&self) -> bool {
        self.status == DocumentStatus::Published && self.published
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub workspace_id: Uuid,
    pub slug: &'a str,
    pub title: &'a str,
    pub content: &'a serde_json::Value,
    pub content_bytes: i64,
}
