use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::models::plan::PlanTier;
use crate::models::workspace::SubscriptionStatus;
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::state::{usage_period_key, AppState};
use crate::utils::plan_limits::{near_storage_limit, PlanLimits};
use crate::utils::subscription::subscription_status_message;

// GET /api/billing/usage
pub async fn get_usage(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => workspace,
        Ok(None) => return JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for usage");
            return JsonResponse::server_error("Failed to load plan usage").into_response();
        }
    };

    let is_free = app_state.workspace_is_free_plan(&workspace).await;
    let tier = PlanTier::from_is_free(is_free);
    let limits = PlanLimits::for_tier(tier);
    let period_key = usage_period_key(
        is_free,
        workspace.subscription_period_end,
        OffsetDateTime::now_utc(),
    );

    // A stale stored period means the counter is logically zero; the next
    // admission resets it for real.
    let ai_used = if workspace.ai_usage_period.as_deref() == Some(period_key.as_str()) {
        workspace.ai_usage_count
    } else {
        0
    };

    let document_count = match app_state.documents.count_documents(workspace.id).await {
        Ok(count) => count,
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to count documents");
            return JsonResponse::server_error("Failed to load plan usage").into_response();
        }
    };
    let storage_used = match app_state.documents.sum_content_bytes(workspace.id).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to sum storage usage");
            return JsonResponse::server_error("Failed to load plan usage").into_response();
        }
    };

    let mut ai_payload = json!({
        "used": ai_used,
        "period": period_key,
    });
    if let Some(limit) = limits.ai_requests {
        ai_payload["limit"] = json!(limit);
    }

    let mut documents_payload = json!({ "used": document_count });
    if let Some(limit) = limits.documents {
        documents_payload["limit"] = json!(limit);
        documents_payload["at_limit"] = json!(document_count >= limit);
    }

    let storage_payload = json!({
        "used_bytes": storage_used,
        "limit_bytes": limits.storage_bytes,
        "near_limit": near_storage_limit(storage_used, &limits),
    });

    let mut body = json!({
        "success": true,
        "plan": tier.as_str(),
        "ai": ai_payload,
        "documents": documents_payload,
        "storage": storage_payload,
    });
    if let Some(message) = subscription_status_message(&workspace) {
        body["status_message"] = json!(message);
    }

    Json(body).into_response()
}

// POST /api/billing/cancel
//
// Revokes the subscription at the provider; the workspace keeps status
// `canceled` with the already-paid period end, so access winds down at
// the boundary instead of cutting off immediately.
pub async fn cancel_subscription(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => workspace,
        Ok(None) => return JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for cancellation");
            return JsonResponse::server_error("Failed to cancel subscription").into_response();
        }
    };

    let Some(subscription_id) = workspace.subscription_id.as_deref() else {
        return JsonResponse::bad_request("This workspace has no subscription to cancel")
            .into_response();
    };

    if let Err(err) = app_state
        .stripe
        .cancel_subscription_immediately(subscription_id)
        .await
    {
        error!(?err, subscription_id, "failed to cancel subscription at provider");
        return JsonResponse::server_error("Failed to cancel subscription").into_response();
    }

    if let Err(err) = app_state
        .db
        .set_subscription_state(
            workspace.id,
            Some(subscription_id),
            Some(SubscriptionStatus::Canceled),
            workspace.subscription_period_end,
        )
        .await
    {
        error!(?err, workspace_id = %workspace.id, "failed to record cancellation");
        return JsonResponse::server_error("Failed to cancel subscription").into_response();
    }

    JsonResponse::success("Subscription canceled").into_response()
}
