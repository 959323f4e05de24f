use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Raw subscription status as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }

    /// Lenient parse for webhook payloads. Unknown strings map to `None`
    /// so a new provider status never breaks event handling.
    pub fn from_provider(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workspace {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    /// Billing-provider product id. Absent means the workspace was never
    /// attached to a plan and is treated as free tier.
    pub plan_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub subscription_period_end: Option<OffsetDateTime>,
    /// Subscription item used for metered AI usage reporting, if any.
    pub stripe_ai_item_id: Option<String>,
    pub custom_domain: Option<String>,
    pub logo_url: Option<String>,
    pub ai_usage_count: i64,
    pub ai_usage_period: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Staging record for a workspace awaiting billing confirmation. Holds the
/// desired slug so two signups cannot race to the same name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingWorkspace {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub plan_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub checkout_session_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWorkspace<'a> {
    pub owner_id: Uuid,
    pub name: &'a str,
    pub slug: &'a str,
    pub plan_id: Option<&'a str>,
    pub stripe_customer_id: Option<&'a str>,
    pub subscription_id: Option<&'a str>,
    pub subscription_status: Option<SubscriptionStatus>,
}

#[derive(Debug, Clone)]
pub struct NewPendingWorkspace<'a> {
    pub owner_id: Uuid,
    pub name: &'a str,
    pub slug: &'a str,
    pub plan_id: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::SubscriptionStatus;

    #[test]
    fn provider_statuses_round_trip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Unpaid,
        ] {
            assert_eq!(SubscriptionStatus::from_provider(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_provider_status_is_none() {
        assert_eq!(SubscriptionStatus::from_provider("paused"), None);
        assert_eq!(SubscriptionStatus::from_provider(""), None);
    }
}
