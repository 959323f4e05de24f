#![allow(dead_code)]
// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, checkout,
// webhook-events, billing for price/subscription/usage APIs, and connect to satisfy webhook
// payload types). Touching APIs outside those features requires updating Cargo.toml explicitly
// so we keep compile times and binary size in check.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        StripeServiceError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for StripeServiceError {
    fn from(err: stripe::WebhookError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
    Setup,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub price: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub mode: CheckoutMode,
    pub line_items: Vec<CheckoutLineItem>,
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

/// How a catalog price charges. `Free` is what makes a plan free tier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceAmountType {
    Free,
    Fixed,
    Custom,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceInfo {
    pub id: String,
    pub amount_type: PriceAmountType,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<String, StripeServiceError>;

    /// Customer lookup by the provider's external id.
    async fn find_customer_email(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, StripeServiceError>;

    /// Active prices attached to a product; drives free/paid classification.
    async fn get_product_prices(
        &self,
        product_id: &str,
    ) -> Result<Vec<PriceInfo>, StripeServiceError>;

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError>;

    /// Metered-usage ingestion. Callers treat this as telemetry and must
    /// not propagate failures.
    async fn record_usage_event(
        &self,
        subscription_item_id: &str,
        quantity: u64,
    ) -> Result<(), StripeServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;
}

mod live;
mod mock;

pub use live::LiveStripeService;
pub use mock::MockStripeService;
