pub mod admin;
pub mod payment;

pub use admin::admin_auth_middleware;
pub use payment::{payment_middleware, ActualCost, EstimatedCost};
