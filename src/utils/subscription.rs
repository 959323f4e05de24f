use time::OffsetDateTime;

use crate::models::workspace::{SubscriptionStatus, Workspace};

/// Effective access state derived from the raw provider status.
///
/// `past_due` still counts as active: the owner gets a grace period and a
/// warning message instead of an immediate lockout. A canceled subscription
/// stays active for the remainder of the already-paid period.
pub fn is_subscription_active(workspace: &Workspace) -> bool {
    is_active_at(workspace, OffsetDateTime::now_utc())
}

pub fn is_active_at(workspace: &Workspace, now: OffsetDateTime) -> bool {
    match workspace.subscription_status {
        // Workspaces that predate billing integration have no status and
        // remain usable.
        None => true,
        Some(SubscriptionStatus::Active)
        | Some(SubscriptionStatus::Trialing)
        | Some(SubscriptionStatus::PastDue) => true,
        Some(SubscriptionStatus::Canceled) => match workspace.subscription_period_end {
            Some(period_end) => period_end > now,
            None => false,
        },
        Some(SubscriptionStatus::Incomplete)
        | Some(SubscriptionStatus::IncompleteExpired)
        | Some(SubscriptionStatus::Unpaid) => false,
    }
}

/// Single policy point for write access. Product rules that diverge between
/// "can read" and "can create" extend this function, not call sites.
pub fn can_create_documents(workspace: &Workspace) -> bool {
    is_subscription_active(workspace)
}

/// Advisory banner text for the workspace owner. `None` when the
/// subscription is healthy (or absent, or canceled with paid time left).
pub fn subscription_status_message(workspace: &Workspace) -> Option<&'static str> {
    message_at(workspace, OffsetDateTime::now_utc())
}

pub fn message_at(workspace: &Workspace, now: OffsetDateTime) -> Option<&'static str> {
    match workspace.subscription_status {
        None | Some(SubscriptionStatus::Active) | Some(SubscriptionStatus::Trialing) => None,
        Some(SubscriptionStatus::PastDue) => {
            Some("Your last payment failed. Update your payment method to keep your plan.")
        }
        Some(SubscriptionStatus::Canceled) => match workspace.subscription_period_end {
            Some(period_end) if period_end > now => None,
            _ => Some("Your subscription has ended. Renew to keep publishing."),
        },
        Some(SubscriptionStatus::Incomplete) | Some(SubscriptionStatus::IncompleteExpired) => {
            Some("Your subscription setup was not completed. Start checkout again to activate it.")
        }
        Some(SubscriptionStatus::Unpaid) => {
            Some("Your subscription is unpaid. Settle the open invoice to restore access.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workspace::{SubscriptionStatus, Workspace};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn workspace(
        status: Option<SubscriptionStatus>,
        period_end: Option<OffsetDateTime>,
    ) -> Workspace {
        let now = OffsetDateTime::now_utc();
        Workspace {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Acme Legal".into(),
            slug: "acme-legal".into(),
            plan_id: None,
            stripe_customer_id: None,
            subscription_id: status.map(|_| "sub_1".to_string()),
            subscription_status: status,
            subscription_period_end: period_end,
            stripe_ai_item_id: None,
            custom_domain: None,
            logo_url: None,
            ai_usage_count: 0,
            ai_usage_period: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lifecycle_table() {
        let now = OffsetDateTime::now_utc();
        let future = now + Duration::days(7);
        let past = now - Duration::days(7);

        let cases: &[(Option<SubscriptionStatus>, Option<OffsetDateTime>, bool)] = &[
            (None, None, true),
            (Some(SubscriptionStatus::Active), None, true),
            (Some(SubscriptionStatus::Trialing), None, true),
            (Some(SubscriptionStatus::PastDue), None, true),
            (Some(SubscriptionStatus::Canceled), Some(future), true),
            (Some(SubscriptionStatus::Canceled), Some(past), false),
            (Some(SubscriptionStatus::Canceled), None, false),
            (Some(SubscriptionStatus::Incomplete), None, false),
            (Some(SubscriptionStatus::IncompleteExpired), None, false),
            (Some(SubscriptionStatus::Unpaid), None, false),
        ];

        for (status, period_end, expected) in cases {
            let ws = workspace(*status, *period_end);
            assert_eq!(
                is_active_at(&ws, now),
                *expected,
                "status {:?} period_end {:?}",
                status,
                period_end
            );
            assert_eq!(can_create_documents(&ws), is_subscription_active(&ws));
        }
    }

    #[test]
    fn message_is_none_exactly_for_non_warning_active_states() {
        let now = OffsetDateTime::now_utc();
        let future = now + Duration::days(7);
        let past = now - Duration::days(7);

        assert!(message_at(&workspace(None, None), now).is_none());
        assert!(message_at(&workspace(Some(SubscriptionStatus::Active), None), now).is_none());
        assert!(message_at(&workspace(Some(SubscriptionStatus::Trialing), None), now).is_none());
        assert!(
            message_at(&workspace(Some(SubscriptionStatus::Canceled), Some(future)), now)
                .is_none()
        );

        // past_due is active but still warns.
        assert!(message_at(&workspace(Some(SubscriptionStatus::PastDue), None), now).is_some());
        assert!(
            message_at(&workspace(Some(SubscriptionStatus::Canceled), Some(past)), now).is_some()
        );
        assert!(message_at(&workspace(Some(SubscriptionStatus::Canceled), None), now).is_some());
        assert!(message_at(&workspace(Some(SubscriptionStatus::Incomplete), None), now).is_some());
        assert!(
            message_at(&workspace(Some(SubscriptionStatus::IncompleteExpired), None), now)
                .is_some()
        );
        assert!(message_at(&workspace(Some(SubscriptionStatus::Unpaid), None), now).is_some());
    }
}
