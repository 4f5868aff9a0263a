#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use checkout_service::{CheckoutFlow, Session, UserRole};
use checkout_service::store::MemoryStore;
use payment_gateway::{
    Authorization, AuthorizationRequest, Confirmation, ConfirmRequest, GatewayError, PaymentGateway,
};
use shared::{catalog, CartItem, ContactDetails};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct GatewayState {
    intents: HashMap<String, (String, String)>,
    requests: Vec<AuthorizationRequest>,
    confirmations: VecDeque<Result<Confirmation, GatewayError>>,
    confirm_calls: usize,
    reject_with: Option<String>,
}

/// Gateway double that honours idempotency keys the way the real one does.
#[derive(Default)]
pub struct RecordingGateway {
    state: Mutex<GatewayState>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<AuthorizationRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn intent_count(&self) -> usize {
        self.state.lock().unwrap().intents.len()
    }

    pub fn confirm_calls(&self) -> usize {
        self.state.lock().unwrap().confirm_calls
    }

    pub fn reject_with(&self, reason: &str) {
        self.state.lock().unwrap().reject_with = Some(reason.to_string());
    }

    pub fn script_confirmation(&self, result: Result<Confirmation, GatewayError>) {
        self.state.lock().unwrap().confirmations.push_back(result);
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<Authorization, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        if let Some(reason) = state.reject_with.clone() {
            return Ok(Authorization::Rejected { reason });
        }
        let next = state.intents.len() + 1;
        let (id, client_secret) = state
            .intents
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| {
                let id = format!("pi_test_{}", next);
                let secret = format!("{}_secret_{}", id, next);
                (id, secret)
            })
            .clone();
        Ok(Authorization::Authorized { id, client_secret })
    }

    async fn confirm(&self, _request: &ConfirmRequest) -> Result<Confirmation, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.confirm_calls += 1;
        state
            .confirmations
            .pop_front()
            .unwrap_or(Ok(Confirmation::Succeeded))
    }
}

pub struct Harness {
    pub flow: CheckoutFlow,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(RecordingGateway::new());
    let flow = CheckoutFlow::new(store.clone(), gateway.clone(), "usd");
    Harness { flow, store, gateway }
}

pub fn session() -> Session {
    Session {
        user_id: Uuid::new_v4(),
        email: Some("grower@example.com".to_string()),
        role: UserRole::Buyer,
    }
}

pub fn contact() -> ContactDetails {
    ContactDetails {
        shipping_address: "12 Farm Rd, Springfield, IL".to_string(),
        contact_email: "grower@example.com".to_string(),
        contact_phone: "555-0100".to_string(),
        contact_name: "Ada Grower".to_string(),
    }
}

pub fn dec(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap()
}

/// A cart line for catalog product `id` with the given quantity.
pub fn line(id: &str, quantity: u32) -> CartItem {
    let product = catalog::find(id).unwrap();
    CartItem {
        quantity,
        ..CartItem::from(&product)
    }
}

pub fn custom_line(id: &str, price: &str, quantity: u32, seller_id: &str) -> CartItem {
    CartItem {
        id: id.to_string(),
        name: format!("item {}", id),
        price: dec(price),
        quantity,
        image: String::new(),
        seller_id: seller_id.to_string(),
    }
}
