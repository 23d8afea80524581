pub mod crypto;

use std::time::{SystemTime, UNIX_EPOCH};

pub use crypto::VoucherDomain;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
