use payment_gateway::{Confirmation, ConfirmRequest, PaymentGateway};
use shared::Cart;
use tracing::{info, warn};

use crate::error::CheckoutError;

pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred during payment.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Idle,
    Processing,
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Succeeded,
    /// The payer continues off-site; the result arrives as a gateway notification.
    Redirect { url: Option<String> },
    Failed { message: String },
}

/// Payer-side confirmation of one payment intent.
///
/// `idle -> processing -> {succeeded, failed}`; a failed attempt may be
/// resubmitted. Nothing is persisted locally, and the cart is cleared only on
/// success.
#[derive(Debug)]
pub struct PaymentConfirmation {
    state: ConfirmationState,
}

impl Default for PaymentConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentConfirmation {
    pub fn new() -> Self {
        Self {
            state: ConfirmationState::Idle,
        }
    }

    pub fn state(&self) -> &ConfirmationState {
        &self.state
    }

    pub async fn submit(
        &mut self,
        gateway: &dyn PaymentGateway,
        request: &ConfirmRequest,
        cart: &mut Cart,
    ) -> Result<ConfirmationOutcome, CheckoutError> {
        match self.state {
            ConfirmationState::Succeeded => {
                return Err(CheckoutError::Conflict("payment already confirmed".to_string()))
            }
            ConfirmationState::Processing => {
                return Err(CheckoutError::Conflict("payment confirmation in progress".to_string()))
            }
            ConfirmationState::Idle | ConfirmationState::Failed { .. } => {}
        }

        let missing = request.billing.missing_fields();
        if !missing.is_empty() {
            return Err(CheckoutError::Validation(format!(
                "missing billing fields: {}",
                missing.join(", ")
            )));
        }

        self.state = ConfirmationState::Processing;
        let outcome = match gateway.confirm(request).await {
            Ok(Confirmation::Succeeded) => {
                cart.clear();
                self.state = ConfirmationState::Succeeded;
                info!("payment confirmed");
                ConfirmationOutcome::Succeeded
            }
            Ok(Confirmation::ActionRequired { redirect_url }) => {
                self.state = ConfirmationState::Idle;
                info!(redirect = ?redirect_url, "payment requires off-site action");
                ConfirmationOutcome::Redirect { url: redirect_url }
            }
            Ok(Confirmation::Declined { reason }) => {
                self.state = ConfirmationState::Failed {
                    message: reason.clone(),
                };
                warn!(%reason, "payment declined");
                ConfirmationOutcome::Failed { message: reason }
            }
            Err(err) => {
                warn!(error = %err, "payment confirmation failed");
                let message = GENERIC_FAILURE_MESSAGE.to_string();
                self.state = ConfirmationState::Failed {
                    message: message.clone(),
                };
                ConfirmationOutcome::Failed { message }
            }
        };
        Ok(outcome)
    }
}
