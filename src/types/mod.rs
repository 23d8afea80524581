pub mod channel;
pub mod error;
pub mod wire;

pub use channel::{Channel, LedgerStats, PaymentReceipt, StoredVoucher, Voucher};
pub use error::{Error, GatewayError, LedgerError, Result, VoucherError};
pub use wire::{parse_voucher, VOUCHER_HEADER};
