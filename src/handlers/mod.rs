pub mod admin;

pub use admin::{channel_handler, claim_expiring_handler, claim_handler, stats_handler};
