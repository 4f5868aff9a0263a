pub mod api;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod flow;
pub mod models;
pub mod outbox;
pub mod schema;
pub mod session;
pub mod store;

pub use error::CheckoutError;
pub use flow::{CheckoutFlow, PaymentIntent};
pub use session::{Session, SessionVerifier, UserRole};
