use axum::{
    body::Bytes,
    extract::{FromRef, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use payment_gateway::webhook::{self, SIGNATURE_HEADER};
use serde::{Deserialize, Serialize};
use shared::money::deserialize_amount;
use shared::{catalog, CartItem, Category, ContactDetails, Order, OrderDetails, Payment, PaymentOutcome, Product};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::flow::{CheckoutFlow, PaymentIntent};
use crate::session::{Session, SessionVerifier};

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub secret: String,
    pub tolerance_secs: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<CheckoutFlow>,
    pub sessions: Arc<SessionVerifier>,
    pub webhooks: Arc<WebhookSettings>,
}

impl FromRef<AppState> for Arc<SessionVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub q: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CartItem>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_amount: BigDecimal,
    #[serde(flatten)]
    pub contact: ContactDetails,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub order_id: Uuid,
}

impl From<PaymentIntent> for PaymentIntentResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            client_secret: intent.client_secret,
            order_id: intent.order_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub payment_intent_id: String,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/products", get(list_products))
        .route("/checkout", post(checkout))
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/payment-intent", post(create_payment_intent))
        .route("/payments/reconcile", post(reconcile_payment))
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_products(
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<Product>>, CheckoutError> {
    let category = match query.category.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(raw.parse::<Category>().map_err(CheckoutError::Validation)?),
    };
    let needle = query.q.unwrap_or_default();
    Ok(Json(catalog::search(&needle, category)))
}

pub async fn checkout(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<PaymentIntentResponse>, CheckoutError> {
    let intent = state
        .flow
        .begin_checkout(&session, &request.items, &request.total_amount, request.contact)
        .await?;
    Ok(Json(intent.into()))
}

pub async fn create_order(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), CheckoutError> {
    let order = state
        .flow
        .create_order(&session, &request.items, &request.total_amount, request.contact)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<OrderDetails>>, CheckoutError> {
    Ok(Json(state.flow.orders_for_user(&session).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetails>, CheckoutError> {
    Ok(Json(state.flow.order_for_user(&session, order_id).await?))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, CheckoutError> {
    let intent = state
        .flow
        .issue_payment_intent(&session, order_id, &request.amount)
        .await?;
    Ok(Json(intent.into()))
}

pub async fn reconcile_payment(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<Payment>, CheckoutError> {
    let payment = state
        .flow
        .reconcile_payment_for_user(&session, &request.payment_intent_id, request.outcome)
        .await?;
    Ok(Json(payment))
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, CheckoutError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| CheckoutError::Unauthorized("missing webhook signature".to_string()))?;

    webhook::verify_signature(
        signature,
        &body,
        &state.webhooks.secret,
        state.webhooks.tolerance_secs,
        chrono::Utc::now().timestamp(),
    )?;
    let event = webhook::parse_event(&body)?;

    state.flow.apply_webhook_event(&event).await?;
    Ok(Json(WebhookAck { received: true }))
}
