use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::document::{Document, DocumentStatus, NewDocument};

use super::document_repository::DocumentRepository;

const DOCUMENT_COLUMNS: &str = "id, workspace_id, slug, title, content, status, published, \
     content_bytes, created_at, updated_at";

pub struct PostgresDocumentRepository {
    pub pool: PgPool,
}

#[async_trait]
impl DocumentRepository for PostgresDocumentRepository {
    async fn create_document(&self, new: &NewDocument<'_>) -> Result<Document, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO documents
                (workspace_id, slug, title, content, status, published, content_bytes,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'draft', false, $5, now(), now())
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(new.workspace_id)
            .bind(new.slug)
            .bind(new.title)
            .bind(new.content)
            .bind(new.content_bytes)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, sqlx::Error> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE workspace_id = $1 AND id = $2"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(workspace_id)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_document_by_slug(
        &self,
        workspace_id: Uuid,
        slug: &str,
    ) -> Result<Option<Document>, sqlx::Error> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE workspace_id = $1 AND slug = $2"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(workspace_id)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_documents(&self, workspace_id: Uuid) -> Result<Vec<Document>, sqlx::Error> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE workspace_id = $1 ORDER BY updated_at DESC"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn update_document_content(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        title: Option<&str>,
        content: Option<&serde_json::Value>,
        content_bytes: Option<i64>,
    ) -> Result<Option<Document>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE documents
            SET title = COALESCE($3, title),
                content = COALESCE($4, content),
                content_bytes = COALESCE($5, content_bytes),
                updated_at = now()
            WHERE workspace_id = $1 AND id = $2
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(workspace_id)
            .bind(document_id)
            .bind(title)
            .bind(content)
            .bind(content_bytes)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_publication(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        status: DocumentStatus,
        published: bool,
    ) -> Result<Option<Document>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE documents
            SET status = $3, published = $4, updated_at = now()
            WHERE workspace_id = $1 AND id = $2
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(workspace_id)
            .bind(document_id)
            .bind(status)
            .bind(published)
            .fetch_optional(&self.pool)
            .await
    }

    async fn delete_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM documents WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_documents(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE workspace_id = $1")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn sum_content_bytes(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(content_bytes), 0)::bigint FROM documents WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
