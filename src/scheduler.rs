//! On-chain settlement of earned vouchers.
//!
//! Claims are driven two ways: on demand (`claim_due`, honouring the business
//! threshold) and by a background tick (`claim_expiring`) that settles any
//! channel close to expiry regardless of amount, since an expired channel's
//! unclaimed balance goes back to the consumer.

use crate::chain::ChainGateway;
use crate::state::{ChannelLedger, ChannelLocks};
use crate::types::{GatewayError, StoredVoucher};
use crate::utils::unix_now;
use ethers::types::{H256, U256};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};

struct ClaimWorker {
    ledger: Arc<ChannelLedger>,
    gateway: Arc<dyn ChainGateway>,
    locks: ChannelLocks,
    threshold: U256,
    claim_timeout: Duration,
}

struct RunningTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ClaimScheduler {
    worker: Arc<ClaimWorker>,
    task: Mutex<Option<RunningTask>>,
}

impl ClaimScheduler {
    pub fn new(
        ledger: Arc<ChannelLedger>,
        gateway: Arc<dyn ChainGateway>,
        locks: ChannelLocks,
        threshold: U256,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            worker: Arc::new(ClaimWorker {
                ledger,
                gateway,
                locks,
                threshold,
                claim_timeout,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn threshold(&self) -> U256 {
        self.worker.threshold
    }

    /// Claim every channel whose best voucher meets the threshold, or all of
    /// them with `force_all`. Returns the transaction hashes of successful claims.
    pub async fn claim_due(&self, force_all: bool) -> Vec<H256> {
        self.worker.claim_due(force_all).await
    }

    /// Claim every channel expiring within `buffer_secs`, ignoring the threshold.
    pub async fn claim_expiring(&self, buffer_secs: u64) -> Vec<H256> {
        self.worker.claim_expiring(buffer_secs, unix_now()).await
    }

    pub async fn claim_expiring_at(&self, buffer_secs: u64, now: u64) -> Vec<H256> {
        self.worker.claim_expiring(buffer_secs, now).await
    }

    /// Run `claim_expiring` now and then every `interval` until [`stop`](Self::stop).
    ///
    /// Returns `false` if the scheduler was already running.
    pub fn start(&self, interval: Duration, buffer_secs: u64) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Claim scheduler already running");
            return false;
        }

        let interval = interval.max(Duration::from_secs(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let worker = self.worker.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let claimed = worker.claim_expiring(buffer_secs, unix_now()).await;
                        if !claimed.is_empty() {
                            info!(count = claimed.len(), "Claimed expiring channels");
                        }
                    }
                }
            }
            debug!("Claim scheduler loop exited");
        });

        info!(?interval, buffer_secs, "Claim scheduler started");
        *task = Some(RunningTask {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the background tick, waiting for an in-flight pass to finish.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(RunningTask {
            shutdown_tx,
            handle,
        }) = task
        {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "Claim scheduler task ended abnormally");
            }
            info!("Claim scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl ClaimWorker {
    async fn claim_due(&self, force_all: bool) -> Vec<H256> {
        let mut claimed = Vec::new();
        for (channel_id, voucher) in self.ledger.highest_unclaimed_per_channel() {
            if !force_all && voucher.voucher.amount < self.threshold {
                debug!(
                    ?channel_id,
                    amount = %voucher.voucher.amount,
                    threshold = %self.threshold,
                    "Below claim threshold"
                );
                continue;
            }
            if let Some(tx_hash) = self.claim_channel(channel_id).await {
                claimed.push(tx_hash);
            }
        }
        claimed
    }

    async fn claim_expiring(&self, buffer_secs: u64, now: u64) -> Vec<H256> {
        let mut claimed = Vec::new();
        for (channel_id, voucher) in self.ledger.highest_unclaimed_per_channel() {
            if voucher.voucher.amount.is_zero() {
                continue;
            }
            let expiry = match self.ledger.get_channel(channel_id).and_then(|c| c.expiry) {
                Some(expiry) => expiry,
                None => {
                    debug!(?channel_id, "Expiry unknown, skipping expiry claim");
                    continue;
                }
            };
            if expiry.saturating_sub(now) > buffer_secs {
                continue;
            }

            info!(?channel_id, expiry, now, "Channel near expiry, claiming");
            if let Some(tx_hash) = self.claim_channel(channel_id).await {
                claimed.push(tx_hash);
            }
        }
        claimed
    }

    /// Claim the channel's current best voucher. Failures are logged and
    /// leave the channel unclaimed for the next pass.
    ///
    /// The channel lock is held for at most `claim_timeout`, so a stuck
    /// transaction cannot block paid requests on the channel.
    async fn claim_channel(&self, channel_id: H256) -> Option<H256> {
        let _guard = self.locks.acquire(channel_id).await;

        // Re-read under the lock: a newer voucher may have landed since the scan.
        let StoredVoucher { voucher, .. } = self.ledger.highest_unclaimed(channel_id)?;

        let claim = self
            .gateway
            .claim(channel_id, voucher.amount, voucher.nonce, &voucher.signature);
        let outcome = tokio::time::timeout(self.claim_timeout, claim)
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Claim(format!(
                    "not confirmed within {:?}",
                    self.claim_timeout
                )))
            });

        match outcome {
            Ok(tx_hash) => {
                if let Err(e) = self.ledger.mark_claimed(channel_id, tx_hash) {
                    error!(?channel_id, ?tx_hash, error = %e, "Claim mined but ledger update failed");
                }
                info!(?channel_id, amount = %voucher.amount, ?tx_hash, "Channel claimed");
                Some(tx_hash)
            }
            Err(e) => {
                error!(?channel_id, amount = %voucher.amount, error = %e, "Claim failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InMemoryGateway;
    use crate::state::RetentionPolicy;
    use crate::types::Channel;
    use crate::utils::VoucherDomain;
    use crate::validator::VoucherValidator;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::Address;

    const THRESHOLD: u64 = 500_000;

    struct Fixture {
        gateway: Arc<InMemoryGateway>,
        ledger: Arc<ChannelLedger>,
        validator: VoucherValidator,
        scheduler: ClaimScheduler,
        locks: ChannelLocks,
        wallet: LocalWallet,
        domain: VoucherDomain,
    }

    fn fixture() -> Fixture {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let domain = VoucherDomain::new("PaymentChannel", "1", 8453, Address::repeat_byte(0x42));
        let gateway = Arc::new(InMemoryGateway::new(domain.clone()));
        let ledger = Arc::new(ChannelLedger::in_memory(RetentionPolicy::RetainAll));
        let locks = ChannelLocks::new();
        let provider = Address::repeat_byte(0xb0);
        Fixture {
            validator: VoucherValidator::new(gateway.clone(), ledger.clone(), locks.clone(), provider),
            scheduler: ClaimScheduler::new(
                ledger.clone(),
                gateway.clone(),
                locks.clone(),
                U256::from(THRESHOLD),
                Duration::from_millis(200),
            ),
            locks,
            gateway,
            ledger,
            wallet,
            domain,
        }
    }

    impl Fixture {
        /// Open a channel on the fake contract and pay `amount` into it.
        async fn paid_channel(&self, id: u8, amount: u64, expiry: u64) -> H256 {
            let channel_id = H256::repeat_byte(id);
            self.gateway.open_channel(
                channel_id,
                self.wallet.address(),
                Address::repeat_byte(0xb0),
                U256::from(1_000_000u64),
                expiry,
            );
            let voucher = self
                .domain
                .sign(&self.wallet, channel_id, U256::from(amount), U256::one())
                .unwrap();
            self.validator.settle(&voucher, U256::from(amount)).await.unwrap();
            channel_id
        }

        fn claimed_channels(&self) -> Vec<H256> {
            self.gateway.claims().iter().map(|c| c.channel_id).collect()
        }
    }

    #[tokio::test]
    async fn test_claim_expiring_selects_by_expiry_only() {
        let f = fixture();
        let now = unix_now();
        let soon = f.paid_channel(1, 1_000, now + 1_800).await;
        let later = f.paid_channel(2, 1_000, now + 7_200).await;

        let txs = f.scheduler.claim_expiring_at(3_600, now).await;

        assert_eq!(txs.len(), 1);
        assert_eq!(f.claimed_channels(), vec![soon]);
        assert!(f.ledger.highest_unclaimed(soon).is_none());
        assert!(f.ledger.highest_unclaimed(later).is_some());
    }

    #[tokio::test]
    async fn test_claim_expiring_includes_already_expired() {
        let f = fixture();
        let now = unix_now();
        let lapsed = f.paid_channel(1, 1_000, now + 10).await;
        let txs = f.scheduler.claim_expiring_at(0, now + 100).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(f.claimed_channels(), vec![lapsed]);
    }

    #[tokio::test]
    async fn test_claim_expiring_skips_unknown_expiry() {
        let f = fixture();
        let now = unix_now();
        let id = f.paid_channel(1, 1_000, now + 10).await;
        let mut legacy: Channel = f.ledger.get_channel(id).unwrap();
        legacy.expiry = None;
        f.ledger.upsert_channel(legacy).unwrap();

        assert!(f.scheduler.claim_expiring_at(3_600, now).await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_due_respects_threshold_unless_forced() {
        let f = fixture();
        let far = unix_now() + 86_400;
        let big = f.paid_channel(1, 600_000, far).await;
        let small = f.paid_channel(2, 1_000, far).await;

        let txs = f.scheduler.claim_due(false).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(f.claimed_channels(), vec![big]);

        let txs = f.scheduler.claim_due(true).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(f.claimed_channels(), vec![big, small]);
        assert!(f.ledger.highest_unclaimed_per_channel().is_empty());

        assert!(f.scheduler.claim_due(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_claim_does_not_abort_batch() {
        let f = fixture();
        let far = unix_now() + 86_400;
        let broken = f.paid_channel(1, 700_000, far).await;
        let healthy = f.paid_channel(2, 800_000, far).await;
        f.gateway.fail_claims_for(broken);

        let txs = f.scheduler.claim_due(false).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(f.claimed_channels(), vec![healthy]);
        assert!(f.ledger.highest_unclaimed(broken).is_some());

        // Retried on the next pass once the chain cooperates.
        f.gateway.clear_claim_failures();
        assert_eq!(f.scheduler.claim_due(false).await.len(), 1);
        assert!(f.ledger.highest_unclaimed(broken).is_none());
    }

    #[tokio::test]
    async fn test_claims_highest_voucher() {
        let f = fixture();
        let channel_id = f.paid_channel(1, 100_000, unix_now() + 86_400).await;
        let second = f
            .domain
            .sign(&f.wallet, channel_id, U256::from(650_000u64), U256::from(2u64))
            .unwrap();
        f.validator.settle(&second, U256::from(200_000u64)).await.unwrap();

        f.scheduler.claim_due(false).await;

        let claims = f.gateway.claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].amount, U256::from(650_000u64));
        assert!(f.ledger.vouchers_for(channel_id).iter().all(|v| v.claimed));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_cancels() {
        let f = fixture();
        let now = unix_now();
        let id = f.paid_channel(1, 1_000, now + 60).await;

        assert!(f.scheduler.start(Duration::from_secs(3_600), 3_600));
        assert!(!f.scheduler.start(Duration::from_secs(3_600), 3_600));
        assert!(f.scheduler.is_running());

        // The first tick fires immediately.
        for _ in 0..100 {
            if !f.gateway.claims().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.claimed_channels(), vec![id]);

        f.scheduler.stop().await;
        assert!(!f.scheduler.is_running());
        f.scheduler.stop().await;

        assert!(f.scheduler.start(Duration::from_secs(3_600), 3_600));
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stuck_claim_releases_channel_lock() {
        let f = fixture();
        let channel_id = f.paid_channel(1, 600_000, unix_now() + 86_400).await;
        f.gateway.hang_claims_for(channel_id);

        let txs = tokio::time::timeout(Duration::from_secs(5), f.scheduler.claim_due(true))
            .await
            .unwrap();
        assert!(txs.is_empty());
        assert!(f.ledger.highest_unclaimed(channel_id).is_some());
        assert_eq!(f.locks.tracked(), 0);

        // Paid traffic on the channel goes through once the claim gives up.
        let next = f
            .domain
            .sign(&f.wallet, channel_id, U256::from(700_000u64), U256::from(2u64))
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            f.validator.settle(&next, U256::from(100_000u64)),
        )
        .await
        .unwrap()
        .unwrap();

        f.gateway.clear_claim_failures();
        let txs = f.scheduler.claim_due(true).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(f.gateway.claims()[0].amount, U256::from(700_000u64));
    }

    #[tokio::test]
    async fn test_stop_returns_while_claim_is_stuck() {
        let f = fixture();
        let channel_id = f.paid_channel(1, 1_000, unix_now() + 60).await;
        f.gateway.hang_claims_for(channel_id);

        assert!(f.scheduler.start(Duration::from_secs(3_600), 3_600));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), f.scheduler.stop())
            .await
            .unwrap();
        assert!(!f.scheduler.is_running());
    }
}
