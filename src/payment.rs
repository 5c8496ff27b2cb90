//! Card payment return handling and order finalization.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use url::Url;

use crate::api::{ApiClient, Transport};
use crate::error::Error;
use crate::types::UserId;

/// Query parameter the payment gateway appends to the return URL.
pub const RETURN_TOKEN_PARAM: &str = "token_ws";

/// Result of confirming a payment with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failure,
    Pending,
}

impl PaymentOutcome {
    fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("AUTHORIZED") => Self::Success,
            Some("FAILED") => Self::Failure,
            _ => Self::Pending,
        }
    }

    /// Page the shopper lands on for this outcome.
    #[must_use]
    pub fn landing_path(self) -> &'static str {
        match self {
            Self::Success => "/payment-success",
            Self::Failure => "/payment-failure",
            Self::Pending => "/payment-pending",
        }
    }
}

pub struct PaymentService<T> {
    api: Arc<ApiClient<T>>,
}

impl<T: Transport> PaymentService<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        Self { api }
    }

    /// Confirm a gateway transaction. Never fails: a missing token or any
    /// error talking to the API counts as [`PaymentOutcome::Failure`].
    pub async fn confirm_webpay(&self, token: Option<&str>) -> PaymentOutcome {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            tracing::warn!("Payment return without transaction token");
            return PaymentOutcome::Failure;
        };
        match self.api.confirm_webpay(token).await {
            Ok(status) => {
                let outcome = PaymentOutcome::from_status(status.as_deref());
                let status = status.as_deref().unwrap_or("<none>");
                tracing::info!(status, ?outcome, "Payment confirmed");
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "Payment confirmation failed");
                PaymentOutcome::Failure
            }
        }
    }

    /// [`PaymentService::confirm_webpay`] with the token read from the
    /// gateway's return URL.
    pub async fn confirm_return(&self, return_url: &Url) -> PaymentOutcome {
        let token = return_url
            .query_pairs()
            .find(|(key, _)| key == RETURN_TOKEN_PARAM)
            .map(|(_, value)| value.into_owned());
        self.confirm_webpay(token.as_deref()).await
    }

    /// Close the cart of `user_id` as an order.
    ///
    /// # Errors
    ///
    /// API errors as-is.
    pub async fn finalize_order(&self, user_id: UserId) -> Result<JsonValue, Error> {
        let receipt = self.api.finalize_order(user_id).await?;
        tracing::info!(user_id = %user_id, "Order finalized");
        Ok(receipt)
    }
}
