//! Voucher header parsing and the string encodings used on disk and on the wire.

use crate::types::{Voucher, VoucherError};
use ethers::types::{Signature, H256, U256};
use serde::Deserialize;

/// Request header carrying the JSON voucher.
pub const VOUCHER_HEADER: &str = "x-payment-voucher";

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct WireVoucher {
    channel_id: String,
    amount: String,
    nonce: String,
    signature: String,
}

/// Parse a voucher header value.
///
/// The object must contain exactly `channelId`, `amount`, `nonce` and
/// `signature`, all as strings. Anything else is `invalid_voucher_format`.
pub fn parse_voucher(raw: &str) -> Result<Voucher, VoucherError> {
    let wire: WireVoucher =
        serde_json::from_str(raw).map_err(|e| VoucherError::InvalidFormat(e.to_string()))?;

    Ok(Voucher {
        channel_id: parse_channel_id(&wire.channel_id)?,
        amount: parse_decimal("amount", &wire.amount)?,
        nonce: parse_decimal("nonce", &wire.nonce)?,
        signature: parse_signature(&wire.signature)
            .map_err(|e| VoucherError::InvalidFormat(format!("signature: {e}")))?,
    })
}

fn parse_channel_id(value: &str) -> Result<H256, VoucherError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(digits)
        .map_err(|e| VoucherError::InvalidFormat(format!("channelId: {e}")))?;
    if bytes.len() != 32 {
        return Err(VoucherError::InvalidFormat(format!(
            "channelId: expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_decimal(field: &str, value: &str) -> Result<U256, VoucherError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VoucherError::InvalidFormat(format!(
            "{field}: expected a decimal string"
        )));
    }
    U256::from_dec_str(value)
        .map_err(|e| VoucherError::InvalidFormat(format!("{field}: {e:?}")))
}

pub(crate) fn parse_signature(value: &str) -> Result<Signature, String> {
    let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|e| e.to_string())?;
    Signature::try_from(bytes.as_slice()).map_err(|e| e.to_string())
}

pub(crate) fn encode_signature(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

/// U256 as a decimal string, so no JSON reader truncates it to a float.
pub mod u256_dec {
    use ethers::types::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_dec_str(&raw).map_err(|e| D::Error::custom(format!("{e:?}")))
    }
}

/// 65-byte signature as `0x`-prefixed hex.
pub mod signature_hex {
    use ethers::types::Signature;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_signature(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Signature, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_signature(&raw).map_err(D::Error::custom)
    }
}
