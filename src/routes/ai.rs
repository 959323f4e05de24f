use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::state::AppState;
use crate::utils::subscription::is_subscription_active;

#[derive(Debug, Deserialize)]
pub struct CompletionPayload {
    pub prompt: String,
    #[serde(default)]
    pub instruction: Option<String>,
}

// POST /api/ai/complete
//
// Admission goes through the atomic quota path: a denied request is never
// counted, an admitted one is counted exactly once even under concurrency.
pub async fn complete(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CompletionPayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return JsonResponse::bad_request("Prompt is required").into_response();
    }

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(workspace) => workspace,
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for ai request");
            return JsonResponse::server_error("Failed to run AI request").into_response();
        }
    };

    // A user without a workspace has no enforceable quota yet.
    if let Some(workspace) = workspace.as_ref() {
        if !is_subscription_active(workspace) {
            return JsonResponse::forbidden_with_code(
                "Your subscription is not active; renew it to use AI assistance",
                "subscription-inactive",
            )
            .into_response();
        }

        let decision = match app_state.admit_ai_request(workspace).await {
            Ok(decision) => decision,
            Err(err) => {
                error!(?err, workspace_id = %workspace.id, "quota admission failed");
                return JsonResponse::server_error("Failed to run AI request").into_response();
            }
        };
        if !decision.allowed {
            return JsonResponse::forbidden_with_code(
                "You have used all AI requests for this period; upgrade for more",
                "quota-exceeded",
            )
            .into_response();
        }
    }

    // The provider call is bounded; a caller abort tears the future down
    // the same way, so both surface as the dedicated timeout status.
    let timeout = Duration::from_secs(app_state.config.ai.request_timeout_secs);
    let completion = match tokio::time::timeout(
        timeout,
        app_state.ai.complete(prompt, payload.instruction.as_deref()),
    )
    .await
    {
        Ok(Ok(completion)) => completion,
        Ok(Err(err)) => {
            error!(?err, %user_id, "ai provider call failed");
            return JsonResponse::server_error("AI provider is unavailable").into_response();
        }
        Err(_) => {
            warn!(%user_id, "ai request timed out");
            return JsonResponse::request_timeout("AI request timed out").into_response();
        }
    };

    if let Some(workspace) = workspace {
        let state = app_state.clone();
        let tokens_used = completion.tokens_used;
        tokio::spawn(async move {
            state.track_ai_usage(&workspace, tokens_used).await;
        });
    }

    Json(json!({
        "success": true,
        "text": completion.text,
        "tokens_used": completion.tokens_used,
    }))
    .into_response()
}
