pub mod document_repository;
pub mod mock_db;
pub mod postgres_document_repository;
pub mod postgres_workspace_repository;
pub mod workspace_repository;

/// Uniqueness lives in the database; the application treats a violated
/// unique index as a normal conflict outcome, never a crash.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
