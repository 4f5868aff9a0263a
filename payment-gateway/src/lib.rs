use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),
    #[error("gateway returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
    #[error("malformed client secret")]
    InvalidClientSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized { id: String, client_secret: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
}

impl BillingDetails {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("address", &self.address),
            ("phone", &self.phone),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub client_secret: String,
    pub payment_method: String,
    pub billing: BillingDetails,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Succeeded,
    /// The payer has to finish off-site; the outcome arrives by webhook.
    ActionRequired { redirect_url: Option<String> },
    Declined { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<Authorization, GatewayError>;

    async fn confirm(&self, request: &ConfirmRequest) -> Result<Confirmation, GatewayError>;
}

/// Client secrets have the form `<intent id>_secret_<token>`.
pub fn intent_id_from_secret(client_secret: &str) -> Option<&str> {
    match client_secret.split_once("_secret_") {
        Some((id, token)) if !id.is_empty() && !token.is_empty() => Some(id),
        _ => None,
    }
}
