use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::{
    intent_id_from_secret, Authorization, AuthorizationRequest, Confirmation, ConfirmRequest,
    GatewayError, PaymentGateway,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Payment-intent client for a Stripe-compatible API.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    status: String,
    client_secret: Option<String>,
    next_action: Option<NextAction>,
    last_payment_error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    redirect_to_url: Option<RedirectToUrl>,
}

#[derive(Debug, Deserialize)]
struct RedirectToUrl {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn error_message(response: Response) -> String {
        let status = response.status();
        let envelope = response.json::<ErrorEnvelope>().await.unwrap_or_default();
        envelope
            .error
            .message
            .unwrap_or_else(|| status.to_string())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount = request.amount_minor, currency = %request.currency))]
    async fn create_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<Authorization, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .client
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if is_retryable(status) {
            let message = Self::error_message(response).await;
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let reason = Self::error_message(response).await;
            warn!(%status, %reason, "payment intent rejected");
            return Ok(Authorization::Rejected { reason });
        }

        let intent: IntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::Decode(format!("intent {} has no client_secret", intent.id)))?;

        info!(payment_intent_id = %intent.id, "payment intent created");
        Ok(Authorization::Authorized {
            id: intent.id,
            client_secret,
        })
    }

    #[instrument(skip(self, request))]
    async fn confirm(&self, request: &ConfirmRequest) -> Result<Confirmation, GatewayError> {
        let intent_id =
            intent_id_from_secret(&request.client_secret).ok_or(GatewayError::InvalidClientSecret)?;

        let form = [
            ("client_secret", request.client_secret.as_str()),
            ("payment_method", request.payment_method.as_str()),
            ("return_url", request.return_url.as_str()),
            ("receipt_email", request.billing.email.as_str()),
            ("shipping[name]", request.billing.name.as_str()),
            ("shipping[phone]", request.billing.phone.as_str()),
            ("shipping[address][line1]", request.billing.address.as_str()),
        ];

        let response = self
            .client
            .post(self.url(&format!("/v1/payment_intents/{}/confirm", intent_id)))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if is_retryable(status) {
            let message = Self::error_message(response).await;
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let reason = Self::error_message(response).await;
            return Ok(Confirmation::Declined { reason });
        }

        let intent: IntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let confirmation = match intent.status.as_str() {
            "succeeded" => Confirmation::Succeeded,
            "requires_action" | "processing" => Confirmation::ActionRequired {
                redirect_url: intent
                    .next_action
                    .and_then(|action| action.redirect_to_url)
                    .and_then(|redirect| redirect.url),
            },
            other => Confirmation::Declined {
                reason: intent
                    .last_payment_error
                    .and_then(|error| error.message)
                    .unwrap_or_else(|| format!("payment {}", other)),
            },
        };
        info!(payment_intent_id = %intent.id, status = %intent.status, "payment intent confirmed");
        Ok(confirmation)
    }
}
