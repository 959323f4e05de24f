use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::db::document_repository::DocumentRepository;
use crate::db::workspace_repository::{AiQuotaDecision, WorkspaceRepository};
use crate::models::workspace::Workspace;
use crate::services::ai::AiService;
use crate::services::deploy::DeployHook;
use crate::services::dns::DnsResolver;
use crate::services::entitlement::PlanEntitlements;
use crate::services::object_store::ObjectStore;
use crate::services::stripe::StripeService;
use crate::utils::plan_limits::FREE_AI_REQUEST_LIMIT;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn WorkspaceRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub entitlements: Arc<PlanEntitlements>,
    pub dns: Arc<dyn DnsResolver>,
    pub uploads: Arc<dyn ObjectStore>,
    pub deploy: Arc<dyn DeployHook>,
    pub ai: Arc<dyn AiService>,
    pub http_client: Arc<reqwest::Client>,
    pub config: Arc<Config>,
}

/// Key of the current usage-accounting window. Free workspaces meter by
/// calendar month; paid workspaces meter by their subscription period, so
/// the counter resets exactly when the provider bills. A paid workspace
/// with no recorded period end falls back to the month key.
pub fn usage_period_key(
    is_free: bool,
    subscription_period_end: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> String {
    if is_free {
        return month_key(now);
    }
    match subscription_period_end {
        Some(period_end) => period_end.unix_timestamp().to_string(),
        None => month_key(now),
    }
}

fn month_key(now: OffsetDateTime) -> String {
    format!("{:04}-{:02}", now.year(), u8::from(now.month()))
}

impl AppState {
    pub async fn workspace_is_free_plan(&self, workspace: &Workspace) -> bool {
        self.entitlements
            .is_free_plan(workspace.plan_id.as_deref())
            .await
    }

    /// Quota preflight: read the counter, compare, and on a period boundary
    /// reset it. Does NOT consume quota; see `increment_ai_usage`. Two
    /// concurrent callers can both pass before either increments, which is
    /// why the AI route admits through `admit_ai_request` instead.
    pub async fn check_ai_usage(&self, owner_id: Uuid) -> Result<bool, sqlx::Error> {
        let Some(workspace) = self.db.find_workspace_by_owner(owner_id).await? else {
            // No workspace yet means nothing to meter against.
            return Ok(true);
        };

        let is_free = self.workspace_is_free_plan(&workspace).await;
        let period_key = usage_period_key(
            is_free,
            workspace.subscription_period_end,
            OffsetDateTime::now_utc(),
        );

        if workspace.ai_usage_period.as_deref() != Some(period_key.as_str()) {
            self.db.set_ai_usage(workspace.id, 0, &period_key).await?;
            return Ok(true);
        }

        if !is_free {
            return Ok(true);
        }
        Ok(workspace.ai_usage_count < FREE_AI_REQUEST_LIMIT)
    }

    /// Second half of the two-step tracker, called only after an allowed
    /// request.
    pub async fn increment_ai_usage(&self, owner_id: Uuid) -> Result<(), sqlx::Error> {
        if let Some(workspace) = self.db.find_workspace_by_owner(owner_id).await? {
            self.db.increment_ai_usage(workspace.id).await?;
        }
        Ok(())
    }

    /// Hardened admission: period roll, limit compare, and increment happen
    /// in a single conditional update at the storage layer.
    pub async fn admit_ai_request(
        &self,
        workspace: &Workspace,
    ) -> Result<AiQuotaDecision, sqlx::Error> {
        let is_free = self.workspace_is_free_plan(workspace).await;
        let limit = if is_free {
            Some(FREE_AI_REQUEST_LIMIT)
        } else {
            None
        };
        let period_key = usage_period_key(
            is_free,
            workspace.subscription_period_end,
            OffsetDateTime::now_utc(),
        );
        self.db
            .try_increment_ai_usage(workspace.id, &period_key, limit)
            .await
    }

    /// Best-effort metered-usage report to the billing provider. Failures
    /// are logged and swallowed; this is telemetry, not authorization.
    pub async fn track_ai_usage(&self, workspace: &Workspace, tokens_used: i64) {
        let Some(item_id) = workspace.stripe_ai_item_id.as_deref() else {
            return;
        };
        let quantity = tokens_used.max(1) as u64;
        if let Err(err) = self.stripe.record_usage_event(item_id, quantity).await {
            warn!(?err, workspace_id = %workspace.id, "failed to record ai usage event");
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State wired entirely to in-process mocks; tests swap individual
    /// fields to observe or reconfigure a collaborator.
    pub fn for_tests(db: Arc<crate::db::mock_db::MockDb>) -> Self {
        let stripe: Arc<dyn StripeService> =
            Arc::new(crate::services::stripe::MockStripeService::new());
        AppState {
            documents: db.clone(),
            db,
            entitlements: Arc::new(PlanEntitlements::new(stripe.clone())),
            stripe,
            dns: Arc::new(crate::services::dns::MockDnsResolver::new()),
            uploads: Arc::new(crate::services::object_store::MockObjectStore::new()),
            deploy: Arc::new(crate::services::deploy::MockDeployHook::new()),
            ai: Arc::new(crate::services::ai::MockAiService::new()),
            http_client: Arc::new(reqwest::Client::new()),
            config: Arc::new(Config::for_tests()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::{sample_workspace, MockDb};
    use time::Duration;

    fn current_month_key() -> String {
        month_key(OffsetDateTime::now_utc())
    }

    #[test]
    fn free_plan_uses_month_key() {
        let now = OffsetDateTime::now_utc();
        let key = usage_period_key(true, None, now);
        assert_eq!(key, month_key(now));
        assert_eq!(key.len(), 7);
        assert_eq!(&key[4..5], "-");
    }

    #[test]
    fn paid_plan_uses_period_end_timestamp() {
        let now = OffsetDateTime::now_utc();
        let end = now + Duration::days(12);
        assert_eq!(
            usage_period_key(false, Some(end), now),
            end.unix_timestamp().to_string()
        );
        // Paid with no recorded period end degrades to the month key.
        assert_eq!(usage_period_key(false, None, now), month_key(now));
    }

    #[tokio::test]
    async fn no_workspace_means_no_quota() {
        let db = Arc::new(MockDb::new());
        let state = AppState::for_tests(db);
        assert!(state.check_ai_usage(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn allows_below_limit_then_denies_at_limit() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = FREE_AI_REQUEST_LIMIT - 1;
        ws.ai_usage_period = Some(current_month_key());
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        assert!(state.check_ai_usage(owner).await.unwrap());
        state.increment_ai_usage(owner).await.unwrap();
        assert!(!state.check_ai_usage(owner).await.unwrap());
        assert_eq!(
            db.workspaces.lock().unwrap()[0].ai_usage_count,
            FREE_AI_REQUEST_LIMIT
        );
    }

    #[tokio::test]
    async fn period_rollover_resets_counter_and_allows() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = 99;
        ws.ai_usage_period = Some("2024-01".into());
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        assert!(state.check_ai_usage(owner).await.unwrap());
        let stored = db.workspaces.lock().unwrap()[0].clone();
        assert_eq!(stored.ai_usage_count, 0);
        assert_eq!(stored.ai_usage_period, Some(current_month_key()));
    }

    #[tokio::test]
    async fn end_to_end_free_quota_consumption() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = FREE_AI_REQUEST_LIMIT - 1;
        ws.ai_usage_period = Some(current_month_key());
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        // Request 1: allowed and counted.
        assert!(state.check_ai_usage(owner).await.unwrap());
        state.increment_ai_usage(owner).await.unwrap();
        // Request 2: denied, not counted.
        assert!(!state.check_ai_usage(owner).await.unwrap());
        assert_eq!(
            db.workspaces.lock().unwrap()[0].ai_usage_count,
            FREE_AI_REQUEST_LIMIT
        );
    }

    /// The two-step tracker loses the race: both callers pass the check
    /// before either increments, and the counter overshoots the limit.
    #[tokio::test]
    async fn check_then_increment_can_race_past_limit() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = FREE_AI_REQUEST_LIMIT - 1;
        ws.ai_usage_period = Some(current_month_key());
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        // Interleaving: check A, check B, increment A, increment B.
        assert!(state.check_ai_usage(owner).await.unwrap());
        assert!(state.check_ai_usage(owner).await.unwrap());
        state.increment_ai_usage(owner).await.unwrap();
        state.increment_ai_usage(owner).await.unwrap();

        let count = db.workspaces.lock().unwrap()[0].ai_usage_count;
        assert_eq!(count, FREE_AI_REQUEST_LIMIT + 1, "race admitted one extra request");
    }

    /// The hardened path cannot overshoot: with one admission left, exactly
    /// one of the concurrent callers wins.
    #[tokio::test]
    async fn atomic_admission_closes_the_race() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = FREE_AI_REQUEST_LIMIT - 1;
        ws.ai_usage_period = Some(current_month_key());
        db.insert_workspace(ws.clone());
        let state = AppState::for_tests(db.clone());

        let workspace = db.find_workspace_by_owner(owner).await.unwrap().unwrap();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let state = state.clone();
            let workspace = workspace.clone();
            handles.push(tokio::spawn(async move {
                state.admit_ai_request(&workspace).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(
            db.workspaces.lock().unwrap()[0].ai_usage_count,
            FREE_AI_REQUEST_LIMIT
        );
    }

    #[tokio::test]
    async fn admission_rolls_period_atomically() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.ai_usage_count = FREE_AI_REQUEST_LIMIT;
        ws.ai_usage_period = Some("2024-01".into());
        db.insert_workspace(ws);
        let state = AppState::for_tests(db.clone());

        let workspace = db.find_workspace_by_owner(owner).await.unwrap().unwrap();
        let decision = state.admit_ai_request(&workspace).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.period_rolled);
        // The admitted request itself is already counted in the new period.
        assert_eq!(decision.count, 1);
    }

    #[tokio::test]
    async fn usage_tracking_failures_are_swallowed() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.stripe_ai_item_id = Some("si_123".into());
        db.insert_workspace(ws.clone());

        let mut state = AppState::for_tests(db);
        let stripe = crate::services::stripe::MockStripeService::new().with_usage_event_failure();
        state.stripe = Arc::new(stripe.clone());

        // Does not panic or error.
        state.track_ai_usage(&ws, 128).await;
        assert!(stripe.usage_events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_tracking_reports_token_counts() {
        let db = Arc::new(MockDb::new());
        let owner = Uuid::new_v4();
        let mut ws = sample_workspace(owner, "acme");
        ws.stripe_ai_item_id = Some("si_123".into());
        db.insert_workspace(ws.clone());

        let mut state = AppState::for_tests(db);
        let stripe = crate::services::stripe::MockStripeService::new();
        state.stripe = Arc::new(stripe.clone());

        state.track_ai_usage(&ws, 128).await;
        assert_eq!(
            stripe.usage_events.lock().unwrap().as_slice(),
            &[("si_123".to_string(), 128)]
        );

        // Without a metered item there is nothing to report.
        let mut no_item = ws.clone();
        no_item.stripe_ai_item_id = None;
        state.track_ai_usage(&no_item, 128).await;
        assert_eq!(stripe.usage_events.lock().unwrap().len(), 1);
    }
}
