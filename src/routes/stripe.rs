use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::models::workspace::{NewWorkspace, SubscriptionStatus, Workspace};
use crate::responses::JsonResponse;
use crate::state::AppState;

// Small helper: nested json lookup
fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

fn extract_i64(val: &serde_json::Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

fn extract_session_id(event: &serde_json::Value) -> Option<String> {
    extract_str(event, &["data", "object", "id"]).map(|s| s.to_string())
}

fn extract_customer_id(event: &serde_json::Value) -> Option<String> {
    extract_str(event, &["data", "object", "customer"]).map(|s| s.to_string())
}

fn extract_pending_workspace_id(event: &serde_json::Value) -> Option<Uuid> {
    extract_str(event, &["data", "object", "metadata", "pending_workspace_id"])
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn extract_subscription_item_id(event: &serde_json::Value) -> Option<String> {
    jget(event, &["data", "object", "items", "data"])?
        .as_array()?
        .first()?
        .get("id")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_period_end(event: &serde_json::Value) -> Option<OffsetDateTime> {
    extract_i64(event, &["data", "object", "current_period_end"])
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

fn ack() -> Response {
    Json(serde_json::json!({ "received": true })).into_response()
}

async fn resolve_workspace_for_subscription(
    app_state: &AppState,
    subscription_id: Option<&str>,
    customer_id: Option<&str>,
) -> Option<Workspace> {
    if let Some(subscription_id) = subscription_id {
        match app_state
            .db
            .find_workspace_by_subscription_id(subscription_id)
            .await
        {
            Ok(Some(workspace)) => return Some(workspace),
            Ok(None) => {}
            Err(err) => {
                error!(?err, subscription_id, "failed to map subscription to workspace")
            }
        }
    }
    if let Some(customer_id) = customer_id {
        match app_state.db.find_workspace_by_customer_id(customer_id).await {
            Ok(opt) => return opt,
            Err(err) => error!(?err, customer_id, "failed to map customer to workspace"),
        }
    }
    None
}

// POST /api/stripe/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    let evt_type = evt.r#type.as_str();
    let payload = &evt.payload;

    match evt_type {
        // Provisioning step 2: a paid checkout completed, promote the
        // staged workspace into a durable one.
        "checkout.session.completed" => {
            let session_id = match extract_session_id(payload) {
                Some(id) => id,
                None => {
                    warn!("checkout.session.completed missing session id");
                    return ack();
                }
            };

            let mut pending = match app_state
                .db
                .find_pending_workspace_by_session(&session_id)
                .await
            {
                Ok(opt) => opt,
                Err(err) => {
                    error!(?err, session_id, "failed to look up pending workspace");
                    return ack();
                }
            };
            if pending.is_none() {
                if let Some(pending_id) = extract_pending_workspace_id(payload) {
                    pending = match app_state.db.find_pending_workspace(pending_id).await {
                        Ok(opt) => opt,
                        Err(err) => {
                            error!(?err, %pending_id, "failed to look up pending workspace");
                            return ack();
                        }
                    };
                }
            }

            // Replays and foreign sessions land here; acknowledge and no-op
            // for idempotency.
            let Some(pending) = pending else {
                info!(session_id, "checkout completion without pending workspace, ignoring");
                return ack();
            };

            let customer_id = extract_customer_id(payload)
                .or_else(|| pending.stripe_customer_id.clone());
            let subscription_id =
                extract_str(payload, &["data", "object", "subscription"]).map(|s| s.to_string());

            let workspace = match app_state
                .db
                .create_workspace(&NewWorkspace {
                    owner_id: pending.owner_id,
                    name: &pending.name,
                    slug: &pending.slug,
                    plan_id: pending.plan_id.as_deref(),
                    stripe_customer_id: customer_id.as_deref(),
                    subscription_id: subscription_id.as_deref(),
                    subscription_status: Some(SubscriptionStatus::Active),
                })
                .await
            {
                Ok(workspace) => workspace,
                Err(err) if is_unique_violation(&err) => {
                    // The slug race resolved against this signup. Keep the
                    // pending row for support follow-up; the storage
                    // constraint is the arbiter.
                    warn!(
                        slug = %pending.slug,
                        owner_id = %pending.owner_id,
                        "slug taken at promotion time, workspace not created"
                    );
                    return ack();
                }
                Err(err) => {
                    error!(?err, slug = %pending.slug, "failed to promote pending workspace");
                    return ack();
                }
            };

            if let Err(err) = app_state.db.delete_pending_workspace(pending.id).await {
                warn!(?err, pending_id = %pending.id, "failed to delete promoted pending workspace");
            }
            info!(workspace_id = %workspace.id, slug = %workspace.slug, "workspace provisioned from checkout");
            ack()
        }

        "customer.subscription.updated" => {
            let subscription_id = extract_str(payload, &["data", "object", "id"]);
            let customer_id = extract_customer_id(payload);
            let Some(workspace) = resolve_workspace_for_subscription(
                &app_state,
                subscription_id,
                customer_id.as_deref(),
            )
            .await
            else {
                warn!(evt_type, "subscription update for unknown workspace");
                return ack();
            };

            let status = extract_str(payload, &["data", "object", "status"])
                .and_then(SubscriptionStatus::from_provider);
            if status.is_none() {
                warn!(
                    raw = extract_str(payload, &["data", "object", "status"]),
                    "unrecognized subscription status in webhook"
                );
            }
            let period_end = extract_period_end(payload);

            if let Err(err) = app_state
                .db
                .set_subscription_state(workspace.id, subscription_id, status, period_end)
                .await
            {
                error!(?err, workspace_id = %workspace.id, "failed to apply subscription update");
                return ack();
            }

            // Keep the metered-usage item in sync while we have it in hand.
            if let Some(item_id) = extract_subscription_item_id(payload) {
                if let Err(err) = app_state
                    .db
                    .set_ai_billing_item_id(workspace.id, Some(&item_id))
                    .await
                {
                    warn!(?err, workspace_id = %workspace.id, "failed to record usage item id");
                }
            }
            info!(workspace_id = %workspace.id, ?status, "subscription state updated");
            ack()
        }

        "customer.subscription.deleted" => {
            let subscription_id = extract_str(payload, &["data", "object", "id"]);
            let customer_id = extract_customer_id(payload);
            let Some(workspace) = resolve_workspace_for_subscription(
                &app_state,
                subscription_id,
                customer_id.as_deref(),
            )
            .await
            else {
                warn!(evt_type, "subscription deletion for unknown workspace");
                return ack();
            };

            // Canceled with a recorded period end keeps the paid-for time.
            let period_end = extract_period_end(payload);
            if let Err(err) = app_state
                .db
                .set_subscription_state(
                    workspace.id,
                    subscription_id,
                    Some(SubscriptionStatus::Canceled),
                    period_end,
                )
                .await
            {
                error!(?err, workspace_id = %workspace.id, "failed to record subscription deletion");
            }
            ack()
        }

        // An abandoned or failed checkout must not hold a slug forever.
        "checkout.session.async_payment_failed"
        | "checkout.session.expired"
        | "invoice.payment_failed" => {
            if let Some(session_id) = extract_session_id(payload).filter(|_| {
                evt_type.starts_with("checkout.session")
            }) {
                match app_state
                    .db
                    .find_pending_workspace_by_session(&session_id)
                    .await
                {
                    Ok(Some(pending)) => {
                        if let Err(err) =
                            app_state.db.delete_pending_workspace(pending.id).await
                        {
                            error!(?err, pending_id = %pending.id, "failed to drop pending workspace after failure");
                        } else {
                            warn!(
                                session_id,
                                slug = %pending.slug,
                                evt_type,
                                "dropped pending workspace after checkout failure"
                            );
                        }
                    }
                    Ok(None) => {
                        info!(session_id, evt_type, "checkout failure without pending workspace");
                    }
                    Err(err) => {
                        error!(?err, session_id, "failed to look up pending workspace for failure");
                    }
                }
            } else {
                warn!(evt_type, "billing failure event acknowledged");
            }
            ack()
        }

        _ => {
            info!(evt_type, "unhandled stripe event acknowledged");
            ack()
        }
    }
}
