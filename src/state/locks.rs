use ethers::types::H256;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<H256, Arc<AsyncMutex<()>>>>>;

/// Per-channel mutual exclusion.
///
/// The nonce and running-total checks are check-then-update sequences that
/// span chain reads, so they must not interleave for one channel. Different
/// channels never contend. An entry lives only while someone holds or waits
/// for it, so ids that are never seen again cost nothing.
#[derive(Clone, Default)]
pub struct ChannelLocks {
    inner: LockMap,
}

/// Exclusive access to one channel. Dropping it releases the lock.
pub struct ChannelGuard {
    channel_id: H256,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, channel_id: H256) -> ChannelGuard {
        let lock = {
            let mut locks = self.inner.lock();
            locks.entry(channel_id).or_default().clone()
        };
        ChannelGuard {
            channel_id,
            guard: Some(lock.lock_owned().await),
            locks: self.inner.clone(),
        }
    }

    /// Number of channels currently locked or awaited.
    pub fn tracked(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        // Release first so the mutex Arc held by the guard is gone.
        drop(self.guard.take());

        let mut locks = self.locks.lock();
        let idle = locks
            .get(&self.channel_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_channel_serializes() {
        let locks = ChannelLocks::new();
        let guard = locks.acquire(H256::repeat_byte(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(H256::repeat_byte(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_channels_do_not_contend() {
        let locks = ChannelLocks::new();
        let _first = locks.acquire(H256::repeat_byte(1)).await;
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(H256::repeat_byte(2)),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_entries_dropped_once_released() {
        let locks = ChannelLocks::new();
        let first = locks.acquire(H256::repeat_byte(1)).await;
        let second = locks.acquire(H256::repeat_byte(2)).await;
        assert_eq!(locks.tracked(), 2);

        drop(first);
        assert_eq!(locks.tracked(), 1);
        drop(second);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_someone_waits() {
        let locks = ChannelLocks::new();
        let guard = locks.acquire(H256::repeat_byte(1)).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(H256::repeat_byte(1)).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter must get the same mutex, not a fresh one.
        drop(guard);
        assert_eq!(locks.tracked(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);
    }
}
