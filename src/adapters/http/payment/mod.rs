//! HTTP adapter for the payment webhook surface.

mod dto;
mod handlers;
mod routes;

pub use dto::{LivenessResponse, WebhookAck};
pub use handlers::PaymentAppState;
pub use routes::payment_routes;
