//! Order domain: the order aggregate and its payment status lifecycle.

mod aggregate;
mod status;

pub use aggregate::Order;
pub use status::OrderStatus;
