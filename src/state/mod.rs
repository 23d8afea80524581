pub mod channel;
pub mod ledger;
pub mod locks;

pub use channel::{ChannelState, ChannelStatus, PaymentSettings};
pub use ledger::{ChannelLedger, RetentionPolicy};
pub use locks::{ChannelGuard, ChannelLocks};
