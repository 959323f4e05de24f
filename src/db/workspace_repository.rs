use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::workspace::{
    NewPendingWorkspace, NewWorkspace, PendingWorkspace, SubscriptionStatus, Workspace,
};

/// Outcome of the atomic quota admission. `allowed` is false only when the
/// stored count already reached the limit within the same period.
#[derive(Debug, Clone, Copy)]
pub struct AiQuotaDecision {
    pub allowed: bool,
    pub count: i64,
    pub period_rolled: bool,
}

#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn create_workspace(&self, new: &NewWorkspace<'_>) -> Result<Workspace, sqlx::Error>;

    async fn find_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, sqlx::Error>;

    async fn find_workspace_by_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    /// Exact slug match, case-insensitive.
    async fn find_workspace_by_slug(&self, slug: &str)
        -> Result<Option<Workspace>, sqlx::Error>;

    async fn find_workspace_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    async fn find_workspace_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    async fn find_workspace_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    /// Advisory availability check against workspaces AND pending
    /// workspaces, case-insensitive. The unique indexes remain the final
    /// arbiter at insert time.
    async fn is_slug_taken(&self, slug: &str) -> Result<bool, sqlx::Error>;

    async fn update_workspace_settings(
        &self,
        workspace_id: Uuid,
        name: Option<&str>,
        logo_url: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    async fn set_custom_domain(
        &self,
        workspace_id: Uuid,
        domain: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error>;

    async fn set_subscription_state(
        &self,
        workspace_id: Uuid,
        subscription_id: Option<&str>,
        status: Option<SubscriptionStatus>,
        period_end: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error>;

    async fn set_ai_billing_item_id(
        &self,
        workspace_id: Uuid,
        subscription_item_id: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    /// Overwrites the usage counter and period key, used by the two-step
    /// tracker on period rollover.
    async fn set_ai_usage(
        &self,
        workspace_id: Uuid,
        count: i64,
        period_key: &str,
    ) -> Result<(), sqlx::Error>;

    /// Unconditional `count + 1`, the two-step tracker's second half.
    async fn increment_ai_usage(&self, workspace_id: Uuid) -> Result<(), sqlx::Error>;

    /// Hardened admission: rolls the period, compares against the limit,
    /// and increments in one conditional update so concurrent callers can
    /// never admit past the limit. `limit` of `None` means unmetered.
    async fn try_increment_ai_usage(
        &self,
        workspace_id: Uuid,
        period_key: &str,
        limit: Option<i64>,
    ) -> Result<AiQuotaDecision, sqlx::Error>;

    async fn create_pending_workspace(
        &self,
        new: &NewPendingWorkspace<'_>,
    ) -> Result<PendingWorkspace, sqlx::Error>;

    async fn find_pending_workspace(
        &self,
        pending_id: Uuid,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error>;

    async fn find_pending_workspace_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error>;

    async fn set_pending_checkout(
        &self,
        pending_id: Uuid,
        checkout_session_id: &str,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error>;

    async fn delete_pending_workspace(&self, pending_id: Uuid) -> Result<bool, sqlx::Error>;
}
