//! Native balance of the connected identity.
//!
//! [`BalanceFeed`] holds the latest [`BalanceSample`] and refreshes it on
//! demand. [`BalancePoller`] refreshes it on a fixed interval while the
//! identity stays connected. The loop ends on disconnect, on
//! [`PollingHandle::cancel`], or when the handle is dropped.
//!
//! [`BalanceFeed::clear`] starts a new epoch. A refresh that began in an
//! earlier epoch still returns its sample but does not publish it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, TokenError};
use crate::identity::IdentityProvider;
use crate::ledger::LedgerClient;
use crate::types::{Address, BalanceSample};

/// Latest balance sample, shared between the poller and the operations that
/// refresh it after a confirmed transaction. Last write wins.
pub struct BalanceFeed<L> {
    ledger: Arc<L>,
    sender: Arc<watch::Sender<Option<BalanceSample>>>,
    epoch: Arc<AtomicU64>,
}

impl<L> Clone for BalanceFeed<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            sender: Arc::clone(&self.sender),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<L: LedgerClient> BalanceFeed<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            ledger,
            sender: Arc::new(sender),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current epoch; bumped by every [`BalanceFeed::clear`].
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Query the ledger once and publish the result.
    pub async fn refresh_once(&self, address: &Address) -> Result<BalanceSample, LedgerError> {
        self.refresh_in_epoch(address, self.epoch()).await
    }

    /// Query the ledger once and publish the result unless the feed was
    /// cleared since `epoch`.
    pub async fn refresh_in_epoch(
        &self,
        address: &Address,
        epoch: u64,
    ) -> Result<BalanceSample, LedgerError> {
        let lamports = self.ledger.get_balance(address).await?;
        let sample = BalanceSample {
            address: *address,
            lamports,
            observed_at: SystemTime::now(),
        };
        let published = self.sender.send_if_modified(|current| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *current = Some(sample);
            true
        });
        if !published {
            debug!(%address, epoch, "discarding balance sample from a cleared epoch");
        }
        Ok(sample)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BalanceSample>> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> Option<BalanceSample> {
        *self.sender.borrow()
    }

    /// Drop the displayed sample, e.g. after disconnect.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.sender.send_replace(None);
    }
}

/// Handle to a running polling loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollingHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the loop and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "balance polling task did not exit cleanly");
            }
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct BalancePoller<L, I> {
    feed: BalanceFeed<L>,
    identity: Arc<I>,
    interval: Duration,
}

impl<L, I> BalancePoller<L, I>
where
    L: LedgerClient,
    I: IdentityProvider,
{
    pub fn new(feed: BalanceFeed<L>, identity: Arc<I>, interval: Duration) -> Self {
        Self {
            feed,
            identity,
            interval,
        }
    }

    /// Refresh immediately, then every interval, for the currently connected
    /// address. Must be called inside a tokio runtime.
    pub fn start_polling(&self) -> Result<PollingHandle, TokenError> {
        if self.interval.is_zero() {
            return Err(TokenError::InvalidInput(
                "balance poll interval must be non-zero".into(),
            ));
        }
        let address = self
            .identity
            .current_address()
            .ok_or(TokenError::NotConnected)?;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_loop(
            self.feed.clone(),
            Arc::clone(&self.identity),
            address,
            self.interval,
            cancel.clone(),
        ));

        info!(%address, interval_secs = self.interval.as_secs(), "balance polling started");
        Ok(PollingHandle {
            cancel,
            task: Some(task),
        })
    }
}

async fn poll_loop<L, I>(
    feed: BalanceFeed<L>,
    identity: Arc<I>,
    address: Address,
    interval: Duration,
    cancel: CancellationToken,
) where
    L: LedgerClient,
    I: IdentityProvider,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if identity.current_address() != Some(address) {
            info!(%address, "identity disconnected");
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = feed.refresh_once(&address) => match result {
                Ok(sample) => debug!(%address, lamports = sample.lamports, "balance refreshed"),
                Err(e) => warn!(%address, error = %e, "balance refresh failed"),
            },
        }
    }

    info!(%address, "balance polling stopped");
}
