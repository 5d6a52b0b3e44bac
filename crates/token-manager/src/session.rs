//! What the presentation layer talks to.
//!
//! A [`TokenSession`] owns the single [`TokenHandle`] of the session, the
//! notification channel and the balance poller. Each operation emits
//! exactly one [`Notification`] and also returns its result. The channel
//! holds at most [`NOTIFICATION_BUFFER`] undelivered notifications; newer
//! ones are dropped with a warning once it is full.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{ConfigError, TokenError};
use crate::identity::IdentityProvider;
use crate::ledger::{LedgerClient, RpcLedgerClient};
use crate::poller::{BalanceFeed, BalancePoller, PollingHandle};
use crate::stage::{OperationKind, OperationStatus};
use crate::types::{BalanceSample, Notification, Signature, TokenHandle};
use crate::workflow::TokenWorkflow;

/// Undelivered notifications kept for the presentation layer.
pub const NOTIFICATION_BUFFER: usize = 32;

pub struct TokenSession<L, I> {
    workflow: TokenWorkflow<L, I>,
    feed: BalanceFeed<L>,
    poller: BalancePoller<L, I>,
    token: Mutex<Option<TokenHandle>>,
    polling: Mutex<Option<PollingHandle>>,
    notify_tx: mpsc::Sender<Notification>,
    notify_rx: Mutex<Option<mpsc::Receiver<Notification>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<I: IdentityProvider> TokenSession<RpcLedgerClient, I> {
    /// A session against the JSON-RPC endpoint in `config`.
    pub fn with_rpc(identity: Arc<I>, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ledger = Arc::new(RpcLedgerClient::new(config)?);
        Self::new(ledger, identity, config)
    }
}

impl<L, I> TokenSession<L, I>
where
    L: LedgerClient,
    I: IdentityProvider,
{
    /// Fails if `config` does not pass [`EngineConfig::validate`].
    pub fn new(
        ledger: Arc<L>,
        identity: Arc<I>,
        config: &EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let feed = BalanceFeed::new(Arc::clone(&ledger));
        let workflow = TokenWorkflow::new(
            ledger,
            Arc::clone(&identity),
            feed.clone(),
            config.commitment,
        );
        let poller = BalancePoller::new(feed.clone(), identity, config.poll_interval());
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);

        Ok(Self {
            workflow,
            feed,
            poller,
            token: Mutex::new(None),
            polling: Mutex::new(None),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
        })
    }

    /// Start balance polling for the connected identity. Replaces any loop
    /// already running.
    pub fn connect(&self) -> Result<(), TokenError> {
        let handle = self.poller.start_polling()?;
        if let Some(previous) = lock(&self.polling).replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    /// Stop balance polling and clear the displayed balance.
    pub fn disconnect(&self) {
        if let Some(handle) = lock(&self.polling).take() {
            handle.cancel();
        }
        self.feed.clear();
        info!("session disconnected");
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.polling)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Create a token and make it the session's current token.
    pub async fn create_token(&self) -> Result<TokenHandle, TokenError> {
        let result = self.workflow.create_token().await;
        if let Ok(token) = &result {
            *lock(&self.token) = Some(*token);
        }
        self.notify(OperationKind::Create, &result);
        result
    }

    /// Mint one token of the current token into the identity's account.
    pub async fn mint_token(&self) -> Result<Signature, TokenError> {
        let token = self.token();
        let result = self.workflow.mint_token(token.as_ref()).await;
        self.notify(OperationKind::Mint, &result);
        result
    }

    /// Send `amount` whole tokens of the current token to `recipient`.
    pub async fn send_token(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<Signature, TokenError> {
        let token = self.token();
        let result = self
            .workflow
            .send_token(token.as_ref(), recipient, amount)
            .await;
        self.notify(OperationKind::Send, &result);
        result
    }

    pub fn token(&self) -> Option<TokenHandle> {
        *lock(&self.token)
    }

    pub fn balance(&self) -> watch::Receiver<Option<BalanceSample>> {
        self.feed.subscribe()
    }

    pub fn operation_status(&self) -> watch::Receiver<OperationStatus> {
        self.workflow.status()
    }

    /// The notification stream. Returns `None` after the first call.
    pub fn notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        lock(&self.notify_rx).take()
    }

    fn notify<T>(&self, kind: OperationKind, result: &Result<T, TokenError>) {
        let notification = match result {
            Ok(_) => Notification::success(kind.success_message()),
            Err(e) => Notification::failure(kind.failure_message(e)),
        };
        info!(
            operation = kind.as_str(),
            severity = ?notification.severity,
            message = %notification.message,
            "notification"
        );
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(operation = kind.as_str(), "notification buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(operation = kind.as_str(), "notification receiver dropped");
            }
        }
    }
}
