use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::services::stripe::{PriceAmountType, StripeService};

/// Named default policy: an unknown or unresolvable entitlement state maps
/// to the free tier. Entitlement errors must never grant paid-tier limits.
pub const FREE_PLAN_POLICY: &str = "unknown-entitlement-defaults-to-free";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Copy)]
struct CachedTier {
    is_free: bool,
    fetched_at: Instant,
}

/// Resolves a plan (billing-provider product) to free/paid. The catalog
/// lookup sits on the AI admission hot path, so successful answers are
/// cached for a short TTL; failures are never cached.
pub struct PlanEntitlements {
    stripe: Arc<dyn StripeService>,
    cache: DashMap<String, CachedTier>,
    ttl: Duration,
}

impl PlanEntitlements {
    pub fn new(stripe: Arc<dyn StripeService>) -> Self {
        Self::with_ttl(stripe, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(stripe: Arc<dyn StripeService>, ttl: Duration) -> Self {
        Self {
            stripe,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn is_free_plan(&self, plan_id: Option<&str>) -> bool {
        let plan_id = match plan_id.map(str::trim).filter(|p| !p.is_empty()) {
            Some(id) => id,
            None => return true,
        };

        if let Some(cached) = self.cache.get(plan_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.is_free;
            }
            drop(cached);
            self.cache.remove(plan_id);
        }

        match self.stripe.get_product_prices(plan_id).await {
            Ok(prices) => {
                let is_free = prices
                    .iter()
                    .any(|price| price.amount_type == PriceAmountType::Free);
                self.cache.insert(
                    plan_id.to_string(),
                    CachedTier {
                        is_free,
                        fetched_at: Instant::now(),
                    },
                );
                is_free
            }
            Err(err) => {
                warn!(?err, plan_id, policy = FREE_PLAN_POLICY, "plan lookup failed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stripe::{MockStripeService, PriceAmountType, PriceInfo};
    use std::sync::Arc;

    fn price(id: &str, amount_type: PriceAmountType) -> PriceInfo {
        PriceInfo {
            id: id.into(),
            amount_type,
            unit_amount: match amount_type {
                PriceAmountType::Free => Some(0),
                _ => Some(2900),
            },
            currency: Some("usd".into()),
        }
    }

    #[tokio::test]
    async fn missing_plan_is_free() {
        let resolver = PlanEntitlements::new(Arc::new(MockStripeService::new()));
        assert!(resolver.is_free_plan(None).await);
        assert!(resolver.is_free_plan(Some("")).await);
        assert!(resolver.is_free_plan(Some("   ")).await);
    }

    #[tokio::test]
    async fn free_price_classifies_plan_as_free() {
        let stripe = MockStripeService::new().with_product_prices(
            "prod_free",
            vec![
                price("price_paid", PriceAmountType::Fixed),
                price("price_free", PriceAmountType::Free),
            ],
        );
        let resolver = PlanEntitlements::new(Arc::new(stripe));
        assert!(resolver.is_free_plan(Some("prod_free")).await);
    }

    #[tokio::test]
    async fn paid_only_prices_classify_plan_as_paid() {
        let stripe = MockStripeService::new()
            .with_product_prices("prod_paid", vec![price("price_paid", PriceAmountType::Fixed)]);
        let resolver = PlanEntitlements::new(Arc::new(stripe));
        assert!(!resolver.is_free_plan(Some("prod_paid")).await);
    }

    #[tokio::test]
    async fn lookup_failure_defaults_to_free() {
        let stripe = MockStripeService::new().with_catalog_failure();
        let resolver = PlanEntitlements::new(Arc::new(stripe));
        assert!(resolver.is_free_plan(Some("prod_paid")).await);
    }

    #[tokio::test]
    async fn successful_lookup_is_cached() {
        let stripe = MockStripeService::new()
            .with_product_prices("prod_paid", vec![price("price_paid", PriceAmountType::Fixed)]);
        let lookups = stripe.catalog_lookups.clone();
        let resolver = PlanEntitlements::new(Arc::new(stripe));

        assert!(!resolver.is_free_plan(Some("prod_paid")).await);
        assert!(!resolver.is_free_plan(Some("prod_paid")).await);
        assert_eq!(*lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let stripe = MockStripeService::new().with_catalog_failure();
        let lookups = stripe.catalog_lookups.clone();
        let fail_flag = stripe.fail_catalog.clone();
        let prices = stripe.product_prices.clone();
        let resolver = PlanEntitlements::new(Arc::new(stripe));

        assert!(resolver.is_free_plan(Some("prod_paid")).await);

        // Once the catalog recovers the next call re-queries and flips.
        *fail_flag.lock().unwrap() = false;
        prices.lock().unwrap().insert(
            "prod_paid".into(),
            vec![price("price_paid", PriceAmountType::Fixed)],
        );
        assert!(!resolver.is_free_plan(Some("prod_paid")).await);
        assert_eq!(*lookups.lock().unwrap(), 2);
    }
}
