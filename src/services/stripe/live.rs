#![allow(dead_code)]
use super::{
    CheckoutLineItem, CheckoutMode, CheckoutSession, CreateCheckoutSessionRequest, PriceAmountType,
    PriceInfo, StripeEvent, StripeService, StripeServiceError,
};
use async_trait::async_trait;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }
}

fn map_mode(mode: CheckoutMode) -> stripe::CheckoutSessionMode {
    match mode {
        CheckoutMode::Payment => stripe::CheckoutSessionMode::Payment,
        CheckoutMode::Subscription => stripe::CheckoutSessionMode::Subscription,
        CheckoutMode::Setup => stripe::CheckoutSessionMode::Setup,
    }
}

fn map_line_items(items: &[CheckoutLineItem]) -> Vec<stripe::CreateCheckoutSessionLineItems> {
    items
        .iter()
        .map(|li| stripe::CreateCheckoutSessionLineItems {
            price: Some(li.price.clone()),
            quantity: Some(li.quantity),
            ..Default::default()
        })
        .collect()
}

fn classify_price(price: &stripe::Price) -> PriceAmountType {
    if price.custom_unit_amount.is_some() {
        PriceAmountType::Custom
    } else if price.unit_amount.unwrap_or(0) == 0 {
        PriceAmountType::Free
    } else {
        PriceAmountType::Fixed
    }
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(map_mode(req.mode));
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        if let Some(ref id) = req.client_reference_id {
            params.client_reference_id = Some(id);
        }
        if let Some(ref customer) = req.customer {
            let cid = customer
                .parse::<stripe::CustomerId>()
                .map_err(|e| StripeServiceError::Other(e.to_string()))?;
            params.customer = Some(cid);
        }
        if let Some(ref email) = req.customer_email {
            params.customer_email = Some(email);
        }
        if let Some(ref meta) = req.metadata {
            let mut m = std::collections::HashMap::new();
            for (k, v) in meta.iter() {
                m.insert(k.clone(), v.clone());
            }
            params.metadata = Some(m);
        }
        if !req.line_items.is_empty() {
            let mapped = map_line_items(&req.line_items);
            params.line_items = Some(mapped);
        }

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        if let Some(name) = name {
            params.name = Some(name);
        }
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn find_customer_email(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, StripeServiceError> {
        let cid = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let customer = stripe::Customer::retrieve(&self.client, &cid, &[]).await?;
        Ok(customer.email.clone())
    }

    async fn get_product_prices(
        &self,
        product_id: &str,
    ) -> Result<Vec<PriceInfo>, StripeServiceError> {
        let mut params = stripe::ListPrices::new();
        params.product = Some(stripe::IdOrCreate::Id(product_id));
        params.active = Some(true);
        let prices = stripe::Price::list(&self.client, &params).await?;

        Ok(prices
            .data
            .iter()
            .map(|price| PriceInfo {
                id: price.id.to_string(),
                amount_type: classify_price(price),
                unit_amount: price.unit_amount,
                currency: price.currency.map(|c| c.to_string()),
            })
            .collect())
    }

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        stripe::Subscription::cancel(&self.client, &sub_id, Default::default()).await?;
        Ok(())
    }

    async fn record_usage_event(
        &self,
        subscription_item_id: &str,
        quantity: u64,
    ) -> Result<(), StripeServiceError> {
        let item_id = subscription_item_id
            .parse::<stripe::SubscriptionItemId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let params = stripe::CreateUsageRecord {
            quantity,
            action: Some(stripe::UsageRecordAction::Increment),
            timestamp: None,
        };
        stripe::UsageRecord::create(&self.client, &item_id, params).await?;
        Ok(())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let event =
            stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        let payload =
            serde_json::to_value(&event).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        Ok(StripeEvent {
            id: event.id.to_string(),
            r#type: event.type_.to_string(),
            payload,
        })
    }
}
