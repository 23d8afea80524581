use crate::types::Voucher;
use ethers::{
    abi::{encode, Token},
    signers::{LocalWallet, WalletError},
    types::{Address, RecoveryMessage, SignatureError, H256, U256},
    utils::keccak256,
};

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const VOUCHER_TYPE: &str = "Voucher(bytes32 channelId,uint256 amount,uint256 nonce)";

/// The EIP-712 domain vouchers are signed under, fixed per deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoucherDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
    separator: [u8; 32],
}

impl VoucherDomain {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        let name = name.into();
        let version = version.into();
        let separator = keccak256(encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(version.as_bytes()).to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(verifying_contract),
        ]));
        Self {
            name,
            version,
            chain_id,
            verifying_contract,
            separator,
        }
    }

    pub fn separator(&self) -> H256 {
        H256::from(self.separator)
    }

    /// `keccak256("\x19\x01" ‖ domainSeparator ‖ hashStruct(voucher))`
    pub fn signing_hash(&self, channel_id: H256, amount: U256, nonce: U256) -> H256 {
        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(keccak256(VOUCHER_TYPE).to_vec()),
            Token::FixedBytes(channel_id.as_bytes().to_vec()),
            Token::Uint(amount),
            Token::Uint(nonce),
        ]));

        let mut message = Vec::with_capacity(66);
        message.extend_from_slice(&[0x19, 0x01]);
        message.extend_from_slice(&self.separator);
        message.extend_from_slice(&struct_hash);
        H256::from(keccak256(message))
    }

    pub fn recover(&self, voucher: &Voucher) -> Result<Address, SignatureError> {
        let digest = self.signing_hash(voucher.channel_id, voucher.amount, voucher.nonce);
        voucher.signature.recover(RecoveryMessage::Hash(digest))
    }

    /// True when the voucher was signed by `signer` under this domain.
    pub fn verify(&self, voucher: &Voucher, signer: Address) -> bool {
        matches!(self.recover(voucher), Ok(recovered) if recovered == signer)
    }

    /// Sign a voucher as the channel consumer would.
    pub fn sign(
        &self,
        wallet: &LocalWallet,
        channel_id: H256,
        amount: U256,
        nonce: U256,
    ) -> Result<Voucher, WalletError> {
        let signature = wallet.sign_hash(self.signing_hash(channel_id, amount, nonce))?;
        Ok(Voucher {
            channel_id,
            amount,
            nonce,
            signature,
        })
    }
}
