#![allow(dead_code)]
use super::{
    CheckoutSession, CreateCheckoutSessionRequest, PriceInfo, StripeEvent, StripeService,
    StripeServiceError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub customers: Arc<Mutex<HashMap<String, String>>>,
    pub product_prices: Arc<Mutex<HashMap<String, Vec<PriceInfo>>>>,
    pub catalog_lookups: Arc<Mutex<usize>>,
    pub fail_catalog: Arc<Mutex<bool>>,
    pub canceled_subscriptions: Arc<Mutex<Vec<String>>>,
    pub usage_events: Arc<Mutex<Vec<(String, u64)>>>,
    pub fail_usage_events: Arc<Mutex<bool>>,
    pub events: Arc<Mutex<Vec<StripeEvent>>>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product_prices(self, product_id: &str, prices: Vec<PriceInfo>) -> Self {
        self.product_prices
            .lock()
            .unwrap()
            .insert(product_id.to_string(), prices);
        self
    }

    pub fn with_catalog_failure(self) -> Self {
        *self.fail_catalog.lock().unwrap() = true;
        self
    }

    pub fn with_usage_event_failure(self) -> Self {
        *self.fail_usage_events.lock().unwrap() = true;
        self
    }
}

fn make_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{}", prefix, ts)
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        // capture the request
        self.last_create_requests.lock().unwrap().push(req.clone());

        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_customer(
        &self,
        email: &str,
        _name: Option<&str>,
    ) -> Result<String, StripeServiceError> {
        let id = make_id("cus_test");
        self.customers
            .lock()
            .unwrap()
            .insert(id.clone(), email.to_string());
        Ok(id)
    }

    async fn find_customer_email(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, StripeServiceError> {
        Ok(self.customers.lock().unwrap().get(customer_id).cloned())
    }

    async fn get_product_prices(
        &self,
        product_id: &str,
    ) -> Result<Vec<PriceInfo>, StripeServiceError> {
        *self.catalog_lookups.lock().unwrap() += 1;
        if *self.fail_catalog.lock().unwrap() {
            return Err(StripeServiceError::Api("catalog unavailable".into()));
        }
        Ok(self
            .product_prices
            .lock()
            .unwrap()
            .get(product_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError> {
        self.canceled_subscriptions
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(())
    }

    async fn record_usage_event(
        &self,
        subscription_item_id: &str,
        quantity: u64,
    ) -> Result<(), StripeServiceError> {
        if *self.fail_usage_events.lock().unwrap() {
            return Err(StripeServiceError::Api("usage ingestion down".into()));
        }
        self.usage_events
            .lock()
            .unwrap()
            .push((subscription_item_id.to_string(), quantity));
        Ok(())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let id = match val.get("id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => make_id("evt"),
        };
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let evt = StripeEvent {
            id,
            r#type: ty,
            payload: val,
        };
        self.events.lock().unwrap().push(evt.clone());
        Ok(evt)
    }
}
