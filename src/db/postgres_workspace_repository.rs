use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::workspace::{
    NewPendingWorkspace, NewWorkspace, PendingWorkspace, SubscriptionStatus, Workspace,
};

use super::workspace_repository::{AiQuotaDecision, WorkspaceRepository};

const WORKSPACE_COLUMNS: &str = "id, owner_id, name, slug, plan_id, stripe_customer_id, \
     subscription_id, subscription_status, subscription_period_end, stripe_ai_item_id, \
     custom_domain, logo_url, ai_usage_count, ai_usage_period, created_at, updated_at";

pub struct PostgresWorkspaceRepository {
    pub pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    allowed: bool,
    count: i64,
    period_rolled: bool,
}

#[async_trait]
impl WorkspaceRepository for PostgresWorkspaceRepository {
    async fn create_workspace(&self, new: &NewWorkspace<'_>) -> Result<Workspace, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO workspaces
                (owner_id, name, slug, plan_id, stripe_customer_id, subscription_id,
                 subscription_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
            RETURNING {WORKSPACE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(new.owner_id)
            .bind(new.name)
            .bind(new.slug)
            .bind(new.plan_id)
            .bind(new.stripe_customer_id)
            .bind(new.subscription_id)
            .bind(new.subscription_status)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = $1");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_workspace_by_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE owner_id = $1 ORDER BY created_at ASC LIMIT 1"
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_workspace_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query =
            format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE lower(slug) = lower($1)");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_workspace_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE lower(custom_domain) = lower($1)"
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_workspace_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query =
            format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE subscription_id = $1");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_workspace_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query =
            format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE stripe_customer_id = $1");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn is_slug_taken(&self, slug: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM workspaces WHERE lower(slug) = lower($1)
                UNION ALL
                SELECT 1 FROM pending_workspaces WHERE lower(slug) = lower($1)
            )
            "#,
        )
        .bind(slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn update_workspace_settings(
        &self,
        workspace_id: Uuid,
        name: Option<&str>,
        logo_url: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE workspaces
            SET name = COALESCE($2, name),
                logo_url = COALESCE($3, logo_url),
                updated_at = now()
            WHERE id = $1
            RETURNING {WORKSPACE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(workspace_id)
            .bind(name)
            .bind(logo_url)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_custom_domain(
        &self,
        workspace_id: Uuid,
        domain: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE workspaces
            SET custom_domain = $2, updated_at = now()
            WHERE id = $1
            RETURNING {WORKSPACE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(workspace_id)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_subscription_state(
        &self,
        workspace_id: Uuid,
        subscription_id: Option<&str>,
        status: Option<SubscriptionStatus>,
        period_end: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workspaces
            SET subscription_id = COALESCE($2, subscription_id),
                subscription_status = $3,
                subscription_period_end = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workspace_id)
        .bind(subscription_id)
        .bind(status)
        .bind(period_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_ai_billing_item_id(
        &self,
        workspace_id: Uuid,
        subscription_item_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workspaces SET stripe_ai_item_id = $2, updated_at = now() WHERE id = $1")
            .bind(workspace_id)
            .bind(subscription_item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_ai_usage(
        &self,
        workspace_id: Uuid,
        count: i64,
        period_key: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workspaces
            SET ai_usage_count = $2, ai_usage_period = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workspace_id)
        .bind(count)
        .bind(period_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_ai_usage(&self, workspace_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workspaces SET ai_usage_count = ai_usage_count + 1, updated_at = now() WHERE id = $1",
        )
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_increment_ai_usage(
        &self,
        workspace_id: Uuid,
        period_key: &str,
        limit: Option<i64>,
    ) -> Result<AiQuotaDecision, sqlx::Error> {
        // Row lock plus conditional update in one round trip; the decision
        // is computed against the pre-update counter.
        let row = sqlx::query_as::<_, QuotaRow>(
            r#"
            WITH current AS (
                SELECT id, ai_usage_count, ai_usage_period
                FROM workspaces
                WHERE id = $1
                FOR UPDATE
            ), updated AS (
                UPDATE workspaces w
                SET ai_usage_count = CASE
                        WHEN c.ai_usage_period IS DISTINCT FROM $2 THEN 1
                        WHEN $3::bigint IS NULL OR c.ai_usage_count < $3 THEN c.ai_usage_count + 1
                        ELSE c.ai_usage_count
                    END,
                    ai_usage_period = $2,
                    updated_at = now()
                FROM current c
                WHERE w.id = c.id
                RETURNING
                    w.ai_usage_count AS count,
                    (c.ai_usage_period IS DISTINCT FROM $2) AS period_rolled,
                    (c.ai_usage_period IS DISTINCT FROM $2
                        OR $3::bigint IS NULL
                        OR c.ai_usage_count < $3) AS allowed
            )
            SELECT count, period_rolled, allowed FROM updated
            "#,
        )
        .bind(workspace_id)
        .bind(period_key)
        .bind(limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(AiQuotaDecision {
            allowed: row.allowed,
            count: row.count,
            period_rolled: row.period_rolled,
        })
    }

    async fn create_pending_workspace(
        &self,
        new: &NewPendingWorkspace<'_>,
    ) -> Result<PendingWorkspace, sqlx::Error> {
        sqlx::query_as::<_, PendingWorkspace>(
            r#"
            INSERT INTO pending_workspaces (owner_id, name, slug, plan_id, created_at)
            VALUES ($1, $2, $3, $4, now())
            RETURNING id, owner_id, name, slug, plan_id, stripe_customer_id,
                      checkout_session_id, created_at
            "#,
        )
        .bind(new.owner_id)
        .bind(new.name)
        .bind(new.slug)
        .bind(new.plan_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_pending_workspace(
        &self,
        pending_id: Uuid,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error> {
        sqlx::query_as::<_, PendingWorkspace>(
            r#"
            SELECT id, owner_id, name, slug, plan_id, stripe_customer_id,
                   checkout_session_id, created_at
            FROM pending_workspaces
            WHERE id = $1
            "#,
        )
        .bind(pending_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_pending_workspace_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error> {
        sqlx::query_as::<_, PendingWorkspace>(
            r#"
            SELECT id, owner_id, name, slug, plan_id, stripe_customer_id,
                   checkout_session_id, created_at
            FROM pending_workspaces
            WHERE checkout_session_id = $1
            "#,
        )
        .bind(checkout_session_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_pending_checkout(
        &self,
        pending_id: Uuid,
        checkout_session_id: &str,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pending_workspaces
            SET checkout_session_id = $2, stripe_customer_id = $3
            WHERE id = $1
            "#,
        )
        .bind(pending_id)
        .bind(checkout_session_id)
        .bind(stripe_customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pending_workspace(&self, pending_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM pending_workspaces WHERE id = $1")
            .bind(pending_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
