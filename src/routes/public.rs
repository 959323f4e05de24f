use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

use crate::models::workspace::Workspace;
use crate::responses::JsonResponse;
use crate::state::AppState;

// The only unauthenticated read surface. Everything that goes wrong on
// this path, including repository errors, collapses into the same
// not-found so existence of private drafts never leaks.
fn gate_not_found() -> Response {
    JsonResponse::not_found("Document not found").into_response()
}

async fn serve_public_document(
    app_state: &AppState,
    workspace: Option<Workspace>,
    document_slug: &str,
) -> Response {
    let Some(workspace) = workspace else {
        return gate_not_found();
    };

    let document = match app_state
        .documents
        .find_document_by_slug(workspace.id, document_slug)
        .await
    {
        Ok(Some(document)) => document,
        Ok(None) => return gate_not_found(),
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, document_slug, "public document lookup failed");
            return gate_not_found();
        }
    };

    if !document.is_publicly_visible() {
        return gate_not_found();
    }

    Json(json!({
        "success": true,
        "workspace": {
            "name": workspace.name,
            "slug": workspace.slug,
            "logo_url": workspace.logo_url,
        },
        "document": {
            "slug": document.slug,
            "title": document.title,
            "content": document.content,
            "updated_at": document
                .updated_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| document.updated_at.to_string()),
        },
    }))
    .into_response()
}

// GET /p/{workspace_slug}/{document_slug}
pub async fn resolve_public_document(
    State(app_state): State<AppState>,
    Path((workspace_slug, document_slug)): Path<(String, String)>,
) -> Response {
    let workspace = match app_state.db.find_workspace_by_slug(&workspace_slug).await {
        Ok(workspace) => workspace,
        Err(err) => {
            error!(?err, workspace_slug, "public workspace lookup failed");
            return gate_not_found();
        }
    };
    serve_public_document(&app_state, workspace, &document_slug).await
}

// GET /d/{document_slug}
//
// Custom-domain variant: the workspace is picked by the Host header.
pub async fn resolve_public_document_by_host(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Path(document_slug): Path<String>,
) -> Response {
    let Some(host) = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_ascii_lowercase())
    else {
        warn!("public fetch without host header");
        return gate_not_found();
    };

    let workspace = match app_state.db.find_workspace_by_custom_domain(&host).await {
        Ok(workspace) => workspace,
        Err(err) => {
            error!(?err, host, "custom domain lookup failed");
            return gate_not_found();
        }
    };
    serve_public_document(&app_state, workspace, &document_slug).await
}
