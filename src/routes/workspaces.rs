use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::models::workspace::{NewPendingWorkspace, NewWorkspace};
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::dns::domain_matches_target;
use crate::services::stripe::{
    CheckoutLineItem, CheckoutMode, CreateCheckoutSessionRequest, PriceAmountType,
};
use crate::state::AppState;
use crate::utils::slug::{is_valid_hostname, is_valid_slug, normalize_slug};

#[derive(Debug, Deserialize)]
pub struct RequestWorkspacePayload {
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

// POST /api/workspaces/request
//
// Provisioning step 1: persist the staging record before payment. Paid
// plans get a checkout URL back; the workspace itself appears only once
// the billing webhook confirms payment. Free plans promote immediately.
pub async fn request_workspace(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<RequestWorkspacePayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    if payload.owner_id != user_id {
        return JsonResponse::forbidden("You can only register a workspace you own")
            .into_response();
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return JsonResponse::bad_request("Workspace name is required").into_response();
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
        None => match normalize_slug(name) {
            Some(slug) => slug,
            None => {
                return JsonResponse::bad_request("Workspace name is not usable as a slug")
                    .into_response()
            }
        },
    };

    match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(_)) => {
            return JsonResponse::conflict("You already have a workspace").into_response()
        }
        Ok(None) => {}
        Err(err) => {
            error!(?err, %user_id, "failed to check existing workspace");
            return JsonResponse::server_error("Failed to create workspace").into_response();
        }
    }

    // Advisory pre-check; the unique index decides for real at insert time.
    match app_state.db.is_slug_taken(&slug).await {
        Ok(true) => return JsonResponse::conflict("Slug already in use").into_response(),
        Ok(false) => {}
        Err(err) => {
            error!(?err, slug, "failed to check slug availability");
            return JsonResponse::server_error("Failed to create workspace").into_response();
        }
    }

    let plan_id = payload.plan_id.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let pending = match app_state
        .db
        .create_pending_workspace(&NewPendingWorkspace {
            owner_id: user_id,
            name,
            slug: &slug,
            plan_id,
        })
        .await
    {
        Ok(pending) => pending,
        Err(err) if is_unique_violation(&err) => {
            return JsonResponse::conflict("Slug already in use").into_response()
        }
        Err(err) => {
            error!(?err, slug, "failed to persist pending workspace");
            return JsonResponse::server_error("Failed to create workspace").into_response();
        }
    };

    // Free plans skip billing and promote on the spot.
    if app_state.entitlements.is_free_plan(plan_id).await {
        let workspace = match app_state
            .db
            .create_workspace(&NewWorkspace {
                owner_id: user_id,
                name,
                slug: &slug,
                plan_id,
                stripe_customer_id: None,
                subscription_id: None,
                subscription_status: None,
            })
            .await
        {
            Ok(workspace) => workspace,
            Err(err) if is_unique_violation(&err) => {
                return JsonResponse::conflict("Slug already in use").into_response()
            }
            Err(err) => {
                error!(?err, slug, "failed to create free workspace");
                return JsonResponse::server_error("Failed to create workspace").into_response();
            }
        };
        if let Err(err) = app_state.db.delete_pending_workspace(pending.id).await {
            warn!(?err, pending_id = %pending.id, "failed to clean up pending workspace");
        }
        info!(workspace_id = %workspace.id, slug, "provisioned free workspace");
        return Json(json!({ "success": true, "workspace": workspace })).into_response();
    }

    let Some(plan_id) = plan_id else {
        // Unreachable in practice: a missing plan id always classifies free.
        return JsonResponse::bad_request("Paid checkout requires a plan").into_response();
    };
    let prices = match app_state.stripe.get_product_prices(plan_id).await {
        Ok(prices) => prices,
        Err(err) => {
            error!(?err, plan_id, "failed to load plan prices for checkout");
            return JsonResponse::server_error("Failed to start checkout").into_response();
        }
    };
    let price = match prices
        .iter()
        .find(|price| price.amount_type == PriceAmountType::Fixed)
    {
        Some(price) => price,
        None => {
            return JsonResponse::bad_request("Selected plan has no purchasable price")
                .into_response()
        }
    };

    let customer_id = match app_state.stripe.create_customer(&claims.email, Some(name)).await {
        Ok(id) => id,
        Err(err) => {
            error!(?err, %user_id, "failed to create billing customer");
            return JsonResponse::server_error("Failed to start checkout").into_response();
        }
    };

    let session = match app_state
        .stripe
        .create_checkout_session(CreateCheckoutSessionRequest {
            success_url: format!("{}/checkout/success", app_state.config.frontend_origin),
            cancel_url: format!("{}/checkout/cancelled", app_state.config.frontend_origin),
            mode: CheckoutMode::Subscription,
            line_items: vec![CheckoutLineItem {
                price: price.id.clone(),
                quantity: 1,
            }],
            client_reference_id: Some(user_id.to_string()),
            customer: Some(customer_id.clone()),
            customer_email: None,
            metadata: Some(
                [
                    ("pending_workspace_id".to_string(), pending.id.to_string()),
                    ("owner_id".to_string(), user_id.to_string()),
                ]
                .into_iter()
                .collect(),
            ),
        })
        .await
    {
        Ok(session) => session,
        Err(err) => {
            error!(?err, %user_id, "failed to create checkout session");
            return JsonResponse::server_error("Failed to start checkout").into_response();
        }
    };

    if let Err(err) = app_state
        .db
        .set_pending_checkout(pending.id, &session.id, &customer_id)
        .await
    {
        error!(?err, pending_id = %pending.id, "failed to attach checkout session to pending workspace");
        return JsonResponse::server_error("Failed to start checkout").into_response();
    }

    Json(json!({ "success": true, "checkout_url": session.url })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SlugAvailabilityQuery {
    pub slug: String,
}

// GET /api/workspaces/slug-available
pub async fn slug_available(
    State(app_state): State<AppState>,
    AuthSession(_claims): AuthSession,
    Query(query): Query<SlugAvailabilityQuery>,
) -> Response {
    let slug = query.slug.trim();
    if slug.is_empty() {
        return JsonResponse::bad_request("Slug is required").into_response();
    }
    match app_state.db.is_slug_taken(slug).await {
        Ok(taken) => Json(json!({ "success": true, "available": !taken })).into_response(),
        Err(err) => {
            error!(?err, slug, "failed to check slug availability");
            JsonResponse::server_error("Failed to check slug availability").into_response()
        }
    }
}

// GET /api/workspaces/mine
//
// The "workspace appeared for this owner" poll target the dashboard hits
// after checkout; promotion happens asynchronously via the billing webhook.
pub async fn my_workspace(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => {
            Json(json!({ "success": true, "workspace": workspace })).into_response()
        }
        Ok(None) => JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace");
            JsonResponse::server_error("Failed to load workspace").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

// PUT /api/workspaces/settings
pub async fn update_settings(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<UpdateSettingsPayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let name = payload.name.as_deref().map(str::trim);
    if let Some("") = name {
        return JsonResponse::bad_request("Workspace name cannot be empty").into_response();
    }

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => workspace,
        Ok(None) => return JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for settings update");
            return JsonResponse::server_error("Failed to update settings").into_response();
        }
    };

    match app_state
        .db
        .update_workspace_settings(workspace.id, name, payload.logo_url.as_deref())
        .await
    {
        Ok(Some(updated)) => Json(json!({ "success": true, "workspace": updated })).into_response(),
        Ok(None) => JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to update settings");
            JsonResponse::server_error("Failed to update settings").into_response()
        }
    }
}

const MAX_LOGO_BYTES: usize = 2 * 1024 * 1024;

fn logo_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/svg+xml" => Some("svg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

// POST /api/workspaces/logo
pub async fn upload_logo(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(extension) = logo_extension(content_type) else {
        return JsonResponse::bad_request("Logo must be a PNG, JPEG, SVG, or WebP image")
            .into_response();
    };
    if body.is_empty() || body.len() > MAX_LOGO_BYTES {
        return JsonResponse::bad_request("Logo must be between 1 byte and 2 MiB").into_response();
    }

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => workspace,
        Ok(None) => return JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for logo upload");
            return JsonResponse::server_error("Failed to upload logo").into_response();
        }
    };

    // Random suffix busts CDN caches when the logo is replaced.
    let key = format!("logos/{}-{:08x}.{extension}", workspace.id, rand::random::<u32>());
    let url = match app_state.uploads.put(&key, body.to_vec(), content_type).await {
        Ok(url) => url,
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "logo upload failed");
            return JsonResponse::server_error("Failed to upload logo").into_response();
        }
    };

    match app_state
        .db
        .update_workspace_settings(workspace.id, None, Some(&url))
        .await
    {
        Ok(Some(updated)) => Json(json!({ "success": true, "workspace": updated })).into_response(),
        Ok(None) => JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, "failed to persist logo url");
            JsonResponse::server_error("Failed to upload logo").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomDomainPayload {
    pub domain: Option<String>,
}

// PUT /api/workspaces/domain
pub async fn set_custom_domain(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CustomDomainPayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };

    let workspace = match app_state.db.find_workspace_by_owner(user_id).await {
        Ok(Some(workspace)) => workspace,
        Ok(None) => return JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to load workspace for domain update");
            return JsonResponse::server_error("Failed to update domain").into_response();
        }
    };

    let domain = match payload.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        None => {
            // Clearing the domain needs no verification.
            return match app_state.db.set_custom_domain(workspace.id, None).await {
                Ok(Some(updated)) => {
                    Json(json!({ "success": true, "workspace": updated })).into_response()
                }
                Ok(None) => JsonResponse::not_found("No workspace yet").into_response(),
                Err(err) => {
                    error!(?err, workspace_id = %workspace.id, "failed to clear custom domain");
                    JsonResponse::server_error("Failed to update domain").into_response()
                }
            };
        }
        Some(domain) => domain.to_ascii_lowercase(),
    };

    if !is_valid_hostname(&domain) {
        return JsonResponse::bad_request("Domain is not a valid hostname").into_response();
    }

    let cname = match app_state.dns.resolve_cname(&domain).await {
        Ok(cname) => cname,
        Err(err) => {
            error!(?err, domain, "cname lookup failed");
            return JsonResponse::server_error("Failed to verify domain").into_response();
        }
    };

    if !domain_matches_target(cname.as_deref(), &app_state.config.domain_cname_target) {
        // Missing or mismatched records are a normal outcome, not an error.
        return JsonResponse::bad_request_with_code(
            "Domain is not pointing at the publishing target yet",
            "domain-not-verified",
        )
        .into_response();
    }

    match app_state.db.set_custom_domain(workspace.id, Some(&domain)).await {
        Ok(Some(updated)) => Json(json!({ "success": true, "workspace": updated })).into_response(),
        Ok(None) => JsonResponse::not_found("No workspace yet").into_response(),
        Err(err) if is_unique_violation(&err) => {
            JsonResponse::conflict("Domain is already connected to another workspace")
                .into_response()
        }
        Err(err) => {
            error!(?err, workspace_id = %workspace.id, domain, "failed to persist custom domain");
            JsonResponse::server_error("Failed to update domain").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::{sample_workspace, MockDb};
    use crate::db::workspace_repository::WorkspaceRepository;
    use crate::routes::auth::claims::Claims;
    use crate::services::dns::MockDnsResolver;
    use crate::services::stripe::{MockStripeService, PriceAmountType, PriceInfo};
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn paid_price() -> PriceInfo {
        PriceInfo {
            id: "price_paid".into(),
            amount_type: PriceAmountType::Fixed,
            unit_amount: Some(2900),
            currency: Some("usd".into()),
        }
    }

    #[tokio::test]
    async fn slug_availability_is_case_insensitive_and_covers_pending() {
        let db = Arc::new(MockDb::new());
        db.insert_workspace(sample_workspace(Uuid::new_v4(), "acme"));
        db.create_pending_workspace(&NewPendingWorkspace {
            owner_id: Uuid::new_v4(),
            name: "Beta",
            slug: "beta",
            plan_id: None,
        })
        .await
        .unwrap();
        let state = AppState::for_tests(db);

        for (slug, expect_available) in
            [("ACME", false), ("acme", false), ("beta", false), ("gamma", true)]
        {
            let response = slug_available(
                State(state.clone()),
                AuthSession(Claims::for_tests(Uuid::new_v4())),
                Query(SlugAvailabilityQuery { slug: slug.into() }),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["available"], expect_available, "slug {slug}");
        }
    }

    #[tokio::test]
    async fn free_plan_request_promotes_immediately() {
        let db = Arc::new(MockDb::new());
        let state = AppState::for_tests(db.clone());
        let owner = Uuid::new_v4();

        let response = request_workspace(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(RequestWorkspacePayload {
                owner_id: owner,
                name: "Acme Legal".into(),
                slug: None,
                plan_id: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let workspaces = db.workspaces.lock().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].slug, "acme-legal");
        assert_eq!(workspaces[0].owner_id, owner);
        // The staging record is consumed by immediate promotion.
        assert!(db.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn paid_plan_request_creates_checkout_and_keeps_pending() {
        let db = Arc::new(MockDb::new());
        let stripe = MockStripeService::new().with_product_prices("prod_paid", vec![paid_price()]);
        let mut state = AppState::for_tests(db.clone());
        let stripe_arc = Arc::new(stripe.clone());
        state.entitlements = Arc::new(crate::services::entitlement::PlanEntitlements::new(
            stripe_arc.clone(),
        ));
        state.stripe = stripe_arc;
        let owner = Uuid::new_v4();

        let response = request_workspace(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(RequestWorkspacePayload {
                owner_id: owner,
                name: "Acme Legal".into(),
                slug: Some("acme".into()),
                plan_id: Some("prod_paid".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["checkout_url"], "https://example.test/checkout");

        // No workspace until the webhook promotes; the pending row holds the slug.
        assert!(db.workspaces.lock().unwrap().is_empty());
        let pending = db.pending.lock().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].checkout_session_id.is_some());
        assert!(pending[0].stripe_customer_id.is_some());

        let requests = stripe.last_create_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].line_items[0].price, "price_paid");
        assert_eq!(
            requests[0]
                .metadata
                .as_ref()
                .unwrap()
                .get("pending_workspace_id")
                .unwrap(),
            &pending[0].id.to_string()
        );
    }

    #[tokio::test]
    async fn cannot_register_for_another_owner() {
        let state = AppState::for_tests(Arc::new(MockDb::new()));
        let response = request_workspace(
            State(state),
            AuthSession(Claims::for_tests(Uuid::new_v4())),
            Json(RequestWorkspacePayload {
                owner_id: Uuid::new_v4(),
                name: "Acme".into(),
                slug: None,
                plan_id: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn taken_slug_is_a_conflict() {
        let db = Arc::new(MockDb::new());
        db.insert_workspace(sample_workspace(Uuid::new_v4(), "acme"));
        let state = AppState::for_tests(db);
        let owner = Uuid::new_v4();

        let response = request_workspace(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(RequestWorkspacePayload {
                owner_id: owner,
                name: "Another Acme".into(),
                slug: Some("acme".into()),
                plan_id: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn verified_domain_is_persisted() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        db.insert_workspace(sample_workspace(owner, "acme"));
        let mut state = AppState::for_tests(db.clone());
        state.dns = Arc::new(
            MockDnsResolver::new().with_cname("policies.acme.com", "sites.openpolicy.dev."),
        );

        let response = set_custom_domain(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(CustomDomainPayload {
                domain: Some("Policies.Acme.com".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            db.workspaces.lock().unwrap()[0].custom_domain.as_deref(),
            Some("policies.acme.com")
        );
    }

    #[tokio::test]
    async fn unverified_domain_is_rejected_without_persisting() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        db.insert_workspace(sample_workspace(owner, "acme"));
        let state = AppState::for_tests(db.clone());

        let response = set_custom_domain(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(CustomDomainPayload {
                domain: Some("policies.acme.com".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(db.workspaces.lock().unwrap()[0].custom_domain.is_none());
    }

    #[tokio::test]
    async fn duplicate_domain_is_a_conflict() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut other = sample_workspace(Uuid::new_v4(), "other");
        other.custom_domain = Some("policies.acme.com".into());
        db.insert_workspace(other);
        db.insert_workspace(sample_workspace(owner, "acme"));
        let mut state = AppState::for_tests(db.clone());
        state.dns = Arc::new(
            MockDnsResolver::new().with_cname("policies.acme.com", "sites.openpolicy.dev"),
        );

        let response = set_custom_domain(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            Json(CustomDomainPayload {
                domain: Some("policies.acme.com".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn logo_upload_stores_bytes_and_persists_url() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        db.insert_workspace(sample_workspace(owner, "acme"));
        let uploads = Arc::new(crate::services::object_store::MockObjectStore::new());
        let mut state = AppState::for_tests(db.clone());
        state.uploads = uploads.clone();

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "image/png".parse().unwrap());
        let response = upload_logo(
            State(state),
            AuthSession(Claims::for_tests(owner)),
            headers,
            axum::body::Bytes::from_static(&[0u8; 64]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(uploads.uploads.lock().unwrap().len(), 1);
        let ws = db.workspaces.lock().unwrap()[0].clone();
        assert!(ws.logo_url.as_deref().unwrap().starts_with("https://cdn.example.test/logos/"));
    }
}
