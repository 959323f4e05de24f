#![allow(dead_code)]
use async_trait::async_trait;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::document::{Document, DocumentStatus, NewDocument};
use crate::models::workspace::{
    NewPendingWorkspace, NewWorkspace, PendingWorkspace, SubscriptionStatus, Workspace,
};

use super::document_repository::DocumentRepository;
use super::workspace_repository::{AiQuotaDecision, WorkspaceRepository};

/// Stand-in for a Postgres unique-constraint failure so handler code can be
/// exercised against the same `is_unique_violation` path it takes in
/// production.
#[derive(Debug)]
pub struct MockUniqueViolation(pub &'static str);

impl std::fmt::Display for MockUniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockUniqueViolation {}

impl sqlx::error::DatabaseError for MockUniqueViolation {
    fn message(&self) -> &str {
        self.0
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::UniqueViolation
    }
}

pub fn unique_violation(message: &'static str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(MockUniqueViolation(message)))
}

#[derive(Default)]
pub struct MockDb {
    pub workspaces: Mutex<Vec<Workspace>>,
    pub pending: Mutex<Vec<PendingWorkspace>>,
    pub documents: Mutex<Vec<Document>>,
    pub should_fail: bool,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.workspaces.lock().unwrap().push(workspace);
    }

    pub fn insert_document(&self, document: Document) {
        self.documents.lock().unwrap().push(document);
    }

    fn fail_check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("mock db failure".into()));
        }
        Ok(())
    }
}

/// Builder for workspace rows in tests; fields match a freshly provisioned
/// free-tier workspace unless overridden by the caller.
pub fn sample_workspace(owner_id: Uuid, slug: &str) -> Workspace {
    let now = OffsetDateTime::now_utc();
    Workspace {
        id: Uuid::new_v4(),
        owner_id,
        name: slug.to_string(),
        slug: slug.to_string(),
        plan_id: None,
        stripe_customer_id: None,
        subscription_id: None,
        subscription_status: None,
        subscription_period_end: None,
        stripe_ai_item_id: None,
        custom_domain: None,
        logo_url: None,
        ai_usage_count: 0,
        ai_usage_period: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_document(workspace_id: Uuid, slug: &str) -> Document {
    let now = OffsetDateTime::now_utc();
    let content = serde_json::json!({"type": "doc", "blocks": []});
    let content_bytes = content.to_string().len() as i64;
    Document {
        id: Uuid::new_v4(),
        workspace_id,
        slug: slug.to_string(),
        title: slug.to_string(),
        content,
        status: DocumentStatus::Draft,
        published: false,
        content_bytes,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl WorkspaceRepository for MockDb {
    async fn create_workspace(&self, new: &NewWorkspace<'_>) -> Result<Workspace, sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if workspaces
            .iter()
            .any(|ws| ws.slug.eq_ignore_ascii_case(new.slug))
        {
            return Err(unique_violation("workspaces_slug_lower_idx"));
        }
        let now = OffsetDateTime::now_utc();
        let workspace = Workspace {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            name: new.name.to_string(),
            slug: new.slug.to_string(),
            plan_id: new.plan_id.map(str::to_string),
            stripe_customer_id: new.stripe_customer_id.map(str::to_string),
            subscription_id: new.subscription_id.map(str::to_string),
            subscription_status: new.subscription_status,
            subscription_period_end: None,
            stripe_ai_item_id: None,
            custom_domain: None,
            logo_url: None,
            ai_usage_count: 0,
            ai_usage_period: None,
            created_at: now,
            updated_at: now,
        };
        workspaces.push(workspace.clone());
        Ok(workspace)
    }

    async fn find_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| ws.id == workspace_id)
            .cloned())
    }

    async fn find_workspace_by_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| ws.owner_id == owner_id)
            .cloned())
    }

    async fn find_workspace_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| ws.slug.eq_ignore_ascii_case(slug))
            .cloned())
    }

    async fn find_workspace_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| {
                ws.custom_domain
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(domain))
            })
            .cloned())
    }

    async fn find_workspace_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| ws.subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn find_workspace_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .find(|ws| ws.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn is_slug_taken(&self, slug: &str) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let in_workspaces = self
            .workspaces
            .lock()
            .unwrap()
            .iter()
            .any(|ws| ws.slug.eq_ignore_ascii_case(slug));
        let in_pending = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.slug.eq_ignore_ascii_case(slug));
        Ok(in_workspaces || in_pending)
    }

    async fn update_workspace_settings(
        &self,
        workspace_id: Uuid,
        name: Option<&str>,
        logo_url: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            ws.name = name.to_string();
        }
        if let Some(logo_url) = logo_url {
            ws.logo_url = Some(logo_url.to_string());
        }
        ws.updated_at = OffsetDateTime::now_utc();
        Ok(Some(ws.clone()))
    }

    async fn set_custom_domain(
        &self,
        workspace_id: Uuid,
        domain: Option<&str>,
    ) -> Result<Option<Workspace>, sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if let Some(domain) = domain {
            if workspaces.iter().any(|ws| {
                ws.id != workspace_id
                    && ws
                        .custom_domain
                        .as_deref()
                        .is_some_and(|d| d.eq_ignore_ascii_case(domain))
            }) {
                return Err(unique_violation("workspaces_custom_domain_lower_idx"));
            }
        }
        let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) else {
            return Ok(None);
        };
        ws.custom_domain = domain.map(str::to_string);
        ws.updated_at = OffsetDateTime::now_utc();
        Ok(Some(ws.clone()))
    }

    async fn set_subscription_state(
        &self,
        workspace_id: Uuid,
        subscription_id: Option<&str>,
        status: Option<SubscriptionStatus>,
        period_end: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) {
            if let Some(subscription_id) = subscription_id {
                ws.subscription_id = Some(subscription_id.to_string());
            }
            ws.subscription_status = status;
            ws.subscription_period_end = period_end;
            ws.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn set_ai_billing_item_id(
        &self,
        workspace_id: Uuid,
        subscription_item_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) {
            ws.stripe_ai_item_id = subscription_item_id.map(str::to_string);
        }
        Ok(())
    }

    async fn set_ai_usage(
        &self,
        workspace_id: Uuid,
        count: i64,
        period_key: &str,
    ) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) {
            ws.ai_usage_count = count;
            ws.ai_usage_period = Some(period_key.to_string());
            ws.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn increment_ai_usage(&self, workspace_id: Uuid) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut workspaces = self.workspaces.lock().unwrap();
        if let Some(ws) = workspaces.iter_mut().find(|ws| ws.id == workspace_id) {
            ws.ai_usage_count += 1;
            ws.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn try_increment_ai_usage(
        &self,
        workspace_id: Uuid,
        period_key: &str,
        limit: Option<i64>,
    ) -> Result<AiQuotaDecision, sqlx::Error> {
        self.fail_check()?;
        // Single lock held across read and write mirrors the row lock the
        // Postgres implementation takes.
        let mut workspaces = self.workspaces.lock().unwrap();
        let ws = workspaces
            .iter_mut()
            .find(|ws| ws.id == workspace_id)
            .ok_or(sqlx::Error::RowNotFound)?;

        let period_rolled = ws.ai_usage_period.as_deref() != Some(period_key);
        let allowed =
            period_rolled || limit.is_none() || ws.ai_usage_count < limit.unwrap_or(i64::MAX);
        if period_rolled {
            ws.ai_usage_count = 1;
            ws.ai_usage_period = Some(period_key.to_string());
        } else if allowed {
            ws.ai_usage_count += 1;
        }
        ws.updated_at = OffsetDateTime::now_utc();
        Ok(AiQuotaDecision {
            allowed,
            count: ws.ai_usage_count,
            period_rolled,
        })
    }

    async fn create_pending_workspace(
        &self,
        new: &NewPendingWorkspace<'_>,
    ) -> Result<PendingWorkspace, sqlx::Error> {
        self.fail_check()?;
        let mut pending = self.pending.lock().unwrap();
        if pending.iter().any(|p| p.slug.eq_ignore_ascii_case(new.slug)) {
            return Err(unique_violation("pending_workspaces_slug_lower_idx"));
        }
        let record = PendingWorkspace {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            name: new.name.to_string(),
            slug: new.slug.to_string(),
            plan_id: new.plan_id.map(str::to_string),
            stripe_customer_id: None,
            checkout_session_id: None,
            created_at: OffsetDateTime::now_utc(),
        };
        pending.push(record.clone());
        Ok(record)
    }

    async fn find_pending_workspace(
        &self,
        pending_id: Uuid,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == pending_id)
            .cloned())
    }

    async fn find_pending_workspace_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<Option<PendingWorkspace>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.checkout_session_id.as_deref() == Some(checkout_session_id))
            .cloned())
    }

    async fn set_pending_checkout(
        &self,
        pending_id: Uuid,
        checkout_session_id: &str,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut pending = self.pending.lock().unwrap();
        if let Some(p) = pending.iter_mut().find(|p| p.id == pending_id) {
            p.checkout_session_id = Some(checkout_session_id.to_string());
            p.stripe_customer_id = Some(stripe_customer_id.to_string());
        }
        Ok(())
    }

    async fn delete_pending_workspace(&self, pending_id: Uuid) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|p| p.id != pending_id);
        Ok(pending.len() < before)
    }
}

#[async_trait]
impl DocumentRepository for MockDb {
    async fn create_document(&self, new: &NewDocument<'_>) -> Result<Document, sqlx::Error> {
        self.fail_check()?;
        let mut documents = self.documents.lock().unwrap();
        if documents
            .iter()
            .any(|d| d.workspace_id == new.workspace_id && d.slug == new.slug)
        {
            return Err(unique_violation("documents_workspace_slug_idx"));
        }
        let now = OffsetDateTime::now_utc();
        let document = Document {
            id: Uuid::new_v4(),
            workspace_id: new.workspace_id,
            slug: new.slug.to_string(),
            title: new.title.to_string(),
            content: new.content.clone(),
            status: DocumentStatus::Draft,
            published: false,
            content_bytes: new.content_bytes,
            created_at: now,
            updated_at: now,
        };
        documents.push(document.clone());
        Ok(document)
    }

    async fn find_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.workspace_id == workspace_id && d.id == document_id)
            .cloned())
    }

    async fn find_document_by_slug(
        &self,
        workspace_id: Uuid,
        slug: &str,
    ) -> Result<Option<Document>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.workspace_id == workspace_id && d.slug == slug)
            .cloned())
    }

    async fn list_documents(&self, workspace_id: Uuid) -> Result<Vec<Document>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn update_document_content(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        title: Option<&str>,
        content: Option<&serde_json::Value>,
        content_bytes: Option<i64>,
    ) -> Result<Option<Document>, sqlx::Error> {
        self.fail_check()?;
        let mut documents = self.documents.lock().unwrap();
        let Some(doc) = documents
            .iter_mut()
            .find(|d| d.workspace_id == workspace_id && d.id == document_id)
        else {
            return Ok(None);
        };
        if let Some(title) = title {
            doc.title = title.to_string();
        }
        if let Some(content) = content {
            doc.content = content.clone();
        }
        if let Some(content_bytes) = content_bytes {
            doc.content_bytes = content_bytes;
        }
        doc.updated_at = OffsetDateTime::now_utc();
        Ok(Some(doc.clone()))
    }

    async fn set_publication(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        status: DocumentStatus,
        published: bool,
    ) -> Result<Option<Document>, sqlx::Error> {
        self.fail_check()?;
        let mut documents = self.documents.lock().unwrap();
        let Some(doc) = documents
            .iter_mut()
            .find(|d| d.workspace_id == workspace_id && d.id == document_id)
        else {
            return Ok(None);
        };
        doc.status = status;
        doc.published = published;
        doc.updated_at = OffsetDateTime::now_utc();
        Ok(Some(doc.clone()))
    }

    async fn delete_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let mut documents = self.documents.lock().unwrap();
        let before = documents.len();
        documents.retain(|d| !(d.workspace_id == workspace_id && d.id == document_id));
        Ok(documents.len() < before)
    }

    async fn count_documents(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.workspace_id == workspace_id)
            .count() as i64)
    }

    async fn sum_content_bytes(&self, workspace_id: Uuid) -> Result<i64, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.workspace_id == workspace_id)
            .map(|d| d.content_bytes)
            .sum())
    }
}
