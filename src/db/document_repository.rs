use async_trait::async_trait;
use uuid::Uuid;

use crate::models::document::{Document, DocumentStatus, NewDocument};

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create_document(&self, new: &NewDocument<'_>) -> Result<Document, sqlx::Error>;

    async fn find_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, sqlx::Error>;

    /// Exact slug match within one workspace.
    async fn find_document_by_slug(
        &self,
        workspace_id: Uuid,
        slug: &str,
    ) -> Result<Option<Document>, sqlx::Error>;

    async fn list_documents(&self, workspace_id: Uuid) -> Result<Vec<Document>, sqlx::Error>;

    async fn update_document_content(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        title: Option<&str>,
        content: Option<&serde_json::Value>,
        content_bytes: Option<i64>,
    ) -> Result<Option<Document>, sqlx::Error>;

    /// Sets both visibility flags together; publication is always an
    /// explicit toggle, never a side effect of editing.
    async fn set_publication(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        status: DocumentStatus,
        published: bool,
    ) -> Result<Option<Document>, sqlx::Error>;

    async fn delete_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, sqlx::Error>;

    async fn count_documents(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error>;

    async fn sum_content_bytes(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error>;
}
