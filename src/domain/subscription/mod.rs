//! Subscription domain: the subscription aggregate and its lifecycle.

mod aggregate;
mod status;

pub use aggregate::Subscription;
pub use status::SubscriptionStatus;
