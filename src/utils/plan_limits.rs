use crate::models::plan::PlanTier;

/// AI requests per accounting period on the free tier. Paid plans are
/// unmetered at the gate and settle through usage-based billing instead.
pub const FREE_AI_REQUEST_LIMIT: i64 = 10;

pub const FREE_DOCUMENT_LIMIT: i64 = 50;
pub const FREE_STORAGE_BYTE_LIMIT: i64 = 100 * 1024 * 1024;
pub const PAID_STORAGE_BYTE_LIMIT: i64 = 10 * 1024 * 1024 * 1024;

/// Fraction of the storage budget at which the dashboard starts warning.
pub const STORAGE_WARNING_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// `None` means unmetered.
    pub ai_requests: Option<i64>,
    /// `None` means unlimited.
    pub documents: Option<i64>,
    pub storage_bytes: i64,
}

impl PlanLimits {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => PlanLimits {
                ai_requests: Some(FREE_AI_REQUEST_LIMIT),
                documents: Some(FREE_DOCUMENT_LIMIT),
                storage_bytes: FREE_STORAGE_BYTE_LIMIT,
            },
            PlanTier::Paid => PlanLimits {
                ai_requests: None,
                documents: None,
                storage_bytes: PAID_STORAGE_BYTE_LIMIT,
            },
        }
    }
}

/// True when the workspace has used up its document allowance. Unlimited
/// plans never hit this.
pub fn at_document_limit(document_count: i64, limits: &PlanLimits) -> bool {
    match limits.documents {
        Some(limit) => document_count >= limit,
        None => false,
    }
}

pub fn over_storage_limit(used_bytes: i64, limits: &PlanLimits) -> bool {
    used_bytes >= limits.storage_bytes
}

/// Warning threshold for the dashboard, 90% of the byte budget.
pub fn near_storage_limit(used_bytes: i64, limits: &PlanLimits) -> bool {
    used_bytes as f64 >= limits.storage_bytes as f64 * STORAGE_WARNING_RATIO
}
