//! Domain layer. Pure business logic with no I/O; everything outward
//! goes through the ports layer.

pub mod foundation;
pub mod order;
pub mod payment;
pub mod subscription;
