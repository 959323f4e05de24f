use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::models::document::{DocumentStatus, NewDocument};
use crate::models::plan::PlanTier;
use crate::models::workspace::Workspace;
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::state::AppState;
use crate::utils::plan_limits::{at_document_limit, over_storage_limit, PlanLimits};
use crate::utils::slug::{is_valid_slug, normalize_slug};
use crate::utils::subscription::can_create_documents;

async fn owned_workspace(
    app_state: &AppState,
    claims_id: &str,
) -> Result<Workspace, Response> {
    let user_id = Uuid::parse_str(claims_id)
        .map_err(|_| JsonResponse::unauthorized("Invalid user ID").into_response())?;
    match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => Ok(workspace),
        Ok(None) => Err(JsonResponse::not_found("No workspace yet").into_response()),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace");
            Err(JsonResponse::server_error("Failed to load workspace").into_response())
        }
    }
}

fn content_size(content: &serde_json::Value) -> i64 {
    content.to_string().len() as i64
}

fn public_document_url(app_state: &AppState, workspace: &Workspace, slug: &str) -> String {
    format!(
        "{}/p/{}/{}",
        app_state.config.public_origin,
        urlencoding::encode(&workspace.slug),
        urlencoding::encode(slug)
    )
}

fn fire_deploy_hook(app_state: &AppState) {
    let deploy = app_state.deploy.clone();
    tokio::spawn(async move {
        if let Err(err) = deploy.trigger().await {
            warn!(?err, "redeploy trigger failed");
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentPayload {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

// POST /api/documents
pub async fn create_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CreateDocumentPayload>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };

    if !can_create_documents(&workspace) {
        return JsonResponse::forbidden_with_code(
            "Your subscription is not active; renew it to create documents",
            "subscription-inactive",
        )
        .into_response();
    }

    let title = payload.title.trim();
    if title.is_empty() {
        return JsonResponse::bad_request("Document title is required").into_response();
    }
    let slug = match payload.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            if !is_valid_slug(raw) {
                return JsonResponse::bad_request(
                    "Slug may only contain lowercase letters, digits, and dashes",
                )
                .into_response();
            }
            raw.to_string()
        }
        None => match normalize_slug(title) {
            Some(slug) => slug,
            None => {
                return JsonResponse::bad_request("Document title is not usable as a slug")
                    .into_response()
            }
        },
    };

    let tier = PlanTier::from_is_free(app_state.workspace_is_free_plan(&workspace).await);
    let limits = PlanLimits::for_tier(tier);

    let document_count = match app_state.documents.count_documents(workspace.id).await {
        Ok(count) => count,
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to count documents");
            return JsonResponse::server_error("Failed to create document").into_response();
        }
    };
    if at_document_limit(document_count, &limits) {
        return JsonResponse::forbidden_with_code(
            "Document limit reached for your plan; upgrade to add more",
            "quota-exceeded",
        )
        .into_response();
    }

    let used_bytes = match app_state.documents.sum_content_bytes(workspace.id).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to sum storage usage");
            return JsonResponse::server_error("Failed to create document").into_response();
        }
    };
    if over_storage_limit(used_bytes, &limits) {
        return JsonResponse::forbidden_with_code(
            "Storage limit reached for your plan; delete content or upgrade",
            "quota-exceeded",
        )
        .into_response();
    }

    let content = payload
        .content
        .unwrap_or_else(|| json!({ "type": "doc", "blocks": [] }));
    let document = match app_state
        .documents
        .create_document(&NewDocument {
            workspace_id: workspace.id,
            slug: &slug,
            title,
            content: &content,
            content_bytes: content_size(&content),
        })
        .await
    {
        Ok(document) => document,
        Err(err) if is_unique_violation(&err) => {
            return JsonResponse::conflict("A document with this slug already exists")
                .into_response()
        }
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, slug, "failed to create document");
            return JsonResponse::server_error("Failed to create document").into_response();
        }
    };

    Json(json!({ "success": true, "document": document })).into_response()
}

// GET /api/documents
pub async fn list_documents(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };
    match app_state.documents.list_documents(workspace.id).await {
        Ok(documents) => Json(json!({ "success": true, "documents": documents })).into_response(),
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to list documents");
            JsonResponse::server_error("Failed to list documents").into_response()
        }
    }
}

// GET /api/documents/{document_id}
pub async fn get_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(document_id): Path<Uuid>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };
    match app_state.documents.find_document(workspace.id, document_id).await {
        Ok(Some(document)) => Json(json!({ "success": true, "document": document })).into_response(),
        Ok(None) => JsonResponse::not_found("Document not found").into_response(),
        Err(err) => {
            error!(?err, %document_id, "failed to load document");
            JsonResponse::server_error("Failed to load document").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

// PUT /api/documents/{document_id}
pub async fn update_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentPayload>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };

    let title = payload.title.as_deref().map(str::trim);
    if let Some("") = title {
        return JsonResponse::bad_request("Document title cannot be empty").into_response();
    }
    let content_bytes = payload.content.as_ref().map(content_size);

    match app_state
        .documents
        .update_document_content(
            workspace.id,
            document_id,
            title,
            payload.content.as_ref(),
            content_bytes,
        )
        .await
    {
        Ok(Some(document)) => Json(json!({ "success": true, "document": document })).into_response(),
        Ok(None) => JsonResponse::not_found("Document not found").into_response(),
        Err(err) => {
            error!(?err, %document_id, "failed to update document");
            JsonResponse::server_error("Failed to update document").into_response()
        }
    }
}

// POST /api/documents/{document_id}/publish
pub async fn publish_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(document_id): Path<Uuid>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };

    match app_state
        .documents
        .set_publication(workspace.id, document_id, DocumentStatus::Published, true)
        .await
    {
        Ok(Some(document)) => {
            info!(workspace_id = %workspace.id, %document_id, "document published");
            fire_deploy_hook(&app_state);
            let public_url = public_document_url(&app_state, &workspace, &document.slug);
            Json(json!({ "success": true, "document": document, "public_url": public_url }))
                .into_response()
        }
        Ok(None) => JsonResponse::not_found("Document not found").into_response(),
        Err(err) => {
            error!(?err, %document_id, "failed to publish document");
            JsonResponse::server_error("Failed to publish document").into_response()
        }
    }
}

// POST /api/documents/{document_id}/unpublish
pub async fn unpublish_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(document_id): Path<Uuid>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };

    match app_state
        .documents
        .set_publication(workspace.id, document_id, DocumentStatus::Draft, false)
        .await
    {
        Ok(Some(document)) => {
            info!(workspace_id = %workspace.id, %document_id, "document unpublished");
            // Republish so the withdrawn page drops out of the static build.
            fire_deploy_hook(&app_state);
            Json(json!({ "success": true, "document": document })).into_response()
        }
        Ok(None) => JsonResponse::not_found("Document not found").into_response(),
        Err(err) => {
            error!(?err, %document_id, "failed to unpublish document");
            JsonResponse::server_error("Failed to unpublish document").into_response()
        }
    }
}

// DELETE /api/documents/{document_id}
pub async fn delete_document(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(document_id): Path<Uuid>,
) -> Response {
    let workspace = match owned_workspace(&app_state, &claims.id).await {
        Ok(workspace) => workspace,
        Err(response) => return response,
    };

    match app_state.documents.delete_document(workspace.id, document_id).await {
        Ok(true) => JsonResponse::success("Document deleted").into_response(),
        Ok(false) => JsonResponse::not_found("Document not found").into_response(),
        Err(err) => {
            error!(?err, %document_id, "failed to delete document");
            JsonResponse::server_error("Failed to delete document").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::{sample_document, sample_workspace, MockDb};
    use crate::models::workspace::SubscriptionStatus;
    use crate::services::deploy::MockDeployHook;
    use crate::utils::plan_limits::FREE_DOCUMENT_LIMIT;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn state_with_workspace(owner: Uuid) -> (Arc<MockDb>, AppState, Uuid) {
        let db = Arc::new(MockDb::new());
        let ws = sample_workspace(owner, "acme");
        let ws_id = ws.id;
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());
        (db, state, ws_id)
    }

    #[tokio::test]
    async fn creates_document_with_normalized_slug() {
        let owner = Uuid::new_v4();
        let (db, state, ws_id) = state_with_workspace(owner);

        let response = create_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Json(CreateDocumentPayload {
                title: "Privacy Policy".into(),
                slug: None,
                content: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let docs = db.documents.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].slug, "privacy-policy");
        assert_eq!(docs[0].workspace_id, ws_id);
        assert_eq!(docs[0].status, DocumentStatus::Draft);
        assert!(!docs[0].published);
    }

    #[tokio::test]
    async fn inactive_subscription_blocks_creation() {
        let owner = Uuid::new_v4();
        let db = Arc::new(MockDb::new());
        let mut ws = sample_workspace(owner, "acme");
        ws.subscription_status = Some(SubscriptionStatus::Unpaid);
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        let response = create_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Json(CreateDocumentPayload {
                title: "Privacy Policy".into(),
                slug: None,
                content: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(db.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_limit_blocks_creation_on_free_tier() {
        let owner = Uuid::new_v4();
        let (db, state, ws_id) = state_with_workspace(owner);
        for i in 0..FREE_DOCUMENT_LIMIT {
            db.insert_document(sample_document(ws_id, &format!("doc-{i}")));
        }

        let response = create_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Json(CreateDocumentPayload {
                title: "One Too Many".into(),
                slug: None,
                content: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            db.documents.lock().unwrap().len() as i64,
            FREE_DOCUMENT_LIMIT
        );
    }

    #[tokio::test]
    async fn duplicate_slug_is_a_conflict() {
        let owner = Uuid::new_v4();
        let (db, state, ws_id) = state_with_workspace(owner);
        db.insert_document(sample_document(ws_id, "terms"));

        let response = create_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Json(CreateDocumentPayload {
                title: "Terms".into(),
                slug: Some("terms".into()),
                content: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn publish_sets_both_flags_and_triggers_redeploy() {
        let owner = Uuid::new_v4();
        let (db, mut state, ws_id) = state_with_workspace(owner);
        let deploy = Arc::new(MockDeployHook::new());
        state.deploy = deploy.clone();
        let doc = sample_document(ws_id, "terms");
        let doc_id = doc.id;
        db.insert_document(doc);

        let response = publish_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Path(doc_id),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 8192).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json["public_url"],
            "https://sites.example.test/p/acme/terms"
        );

        let stored = db.documents.lock().unwrap()[0].clone();
        assert_eq!(stored.status, DocumentStatus::Published);
        assert!(stored.published);

        // The hook fires on a background task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(deploy.trigger_count(), 1);
    }

    #[tokio::test]
    async fn unpublish_clears_both_flags() {
        let owner = Uuid::new_v4();
        let (db, state, ws_id) = state_with_workspace(owner);
        let mut doc = sample_document(ws_id, "terms");
        doc.status = DocumentStatus::Published;
        doc.published = true;
        let doc_id = doc.id;
        db.insert_document(doc);

        let response = unpublish_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Path(doc_id),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let stored = db.documents.lock().unwrap()[0].clone();
        assert_eq!(stored.status, DocumentStatus::Draft);
        assert!(!stored.published);
    }

    #[tokio::test]
    async fn update_recomputes_content_size() {
        let owner = Uuid::new_v4();
        let (db, state, ws_id) = state_with_workspace(owner);
        let doc = sample_document(ws_id, "terms");
        let doc_id = doc.id;
        db.insert_document(doc);

        let content = json!({ "type": "doc", "blocks": [{ "text": "longer body text" }] });
        let expected_bytes = content.to_string().len() as i64;
        let response = update_document(
            State(state),
            AuthSession(crate::routes::auth::claims::Claims::for_tests(owner)),
            Path(doc_id),
            Json(UpdateDocumentPayload {
                title: None,
                content: Some(content),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(db.documents.lock().unwrap()[0].content_bytes, expected_bytes);
    }
}
