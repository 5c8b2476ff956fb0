//! Checkout-session creation against the billing provider REST API.

use crate::db::{PlanType, User};
use crate::error::{AppError, Result};
use serde::Deserialize;

/// A created checkout session: the ID for later reconciliation and the
/// hosted payment page URL the client redirects to.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionLink {
    /// Session ID.
    pub id: String,
    /// Hosted payment page URL.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

/// Thin client over the provider's customers and checkout-session
/// endpoints. All failures surface as [`AppError::ExternalService`].
pub struct CheckoutClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl CheckoutClient {
    /// Create a client for the given API base and secret key.
    pub fn new(api_base: String, secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            secret_key,
        }
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<reqwest::Response> {
        if self.secret_key.is_empty() {
            return Err(AppError::Config(
                "Billing secret key is not configured".to_string(),
            ));
        }

        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Billing request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Billing provider returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(response)
    }

    /// Create a billing customer for a user.
    pub async fn create_customer(&self, user: &User) -> Result<String> {
        let form = vec![
            ("email".to_string(), user.email.clone()),
            ("name".to_string(), user.name.clone()),
            ("metadata[user_id]".to_string(), user.id.clone()),
        ];

        let response = self.post_form("/v1/customers", &form).await?;
        let customer: CustomerResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Malformed customer response: {}", e)))?;

        Ok(customer.id)
    }

    /// Create a subscription checkout session carrying the user/plan
    /// metadata the webhook handler will need to resolve the completion.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        user: &User,
        plan: PlanType,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSessionLink> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("metadata[user_id]".to_string(), user.id.clone()),
            ("metadata[plan]".to_string(), plan.as_str().to_string()),
        ];

        let response = self.post_form("/v1/checkout/sessions", &form).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Malformed session response: {}", e)))
    }
}
