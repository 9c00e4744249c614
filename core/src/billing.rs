use crate::api::{read_json, ApiClient};
use crate::error::ApiError;
use crate::models::{BillingConfig, RedirectSession, SubscriptionStatus, SubscriptionTier};
use reqwest::header::CONTENT_TYPE;

/// Subscription endpoints. The hosted checkout and portal pages are opened by
/// the caller; this layer only asks the service where to go.
impl ApiClient {
    pub async fn create_checkout_session(
        &self,
        tier: SubscriptionTier,
    ) -> Result<RedirectSession, ApiError> {
        let response = self
            .http()
            .post(self.endpoint(&["api", "create-checkout-session", tier.as_str()])?)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        read_json(response, "Failed to start checkout process").await
    }

    pub async fn create_portal_session(&self) -> Result<RedirectSession, ApiError> {
        let response = self
            .http()
            .post(self.endpoint(&["api", "create-portal-session"])?)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        read_json(response, "Failed to access subscription management").await
    }

    pub async fn current_subscription(&self) -> Result<SubscriptionStatus, ApiError> {
        let response = self
            .http()
            .get(self.endpoint(&["api", "subscriptions", "current"])?)
            .send()
            .await?;
        read_json(response, "Failed to fetch subscription status").await
    }

    pub async fn billing_config(&self) -> Result<BillingConfig, ApiError> {
        let response = self
            .http()
            .get(self.endpoint(&["api", "config"])?)
            .send()
            .await?;
        read_json(response, "Failed to load billing configuration").await
    }
}
