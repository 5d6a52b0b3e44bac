//! Token workflow engine for a Solana-style ledger.
//!
//! A connected identity can create a fungible token (a 9-decimal mint it
//! controls), mint one whole token into its own associated account, and
//! send any amount to another address. Every operation runs through the
//! same pipeline:
//!
//! - [`AccountResolver`] derives associated token accounts and creates
//!   them on demand,
//! - [`instructions`] builds the ledger instructions,
//! - [`TransactionOrchestrator`] signs, submits and confirms them,
//! - [`BalancePoller`] keeps the identity's native balance fresh.
//!
//! [`TokenSession`] ties these together for a presentation layer and turns
//! each outcome into a user-facing [`Notification`].
//!
//! The ledger and the signer sit behind the [`LedgerClient`] and
//! [`IdentityProvider`] traits. [`RpcLedgerClient`] talks JSON-RPC to a
//! cluster; [`MemoryLedger`] executes the same wire transactions in memory
//! for tests.

pub mod amount;
pub mod config;
pub mod error;
pub mod identity;
pub mod instructions;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod session;
pub mod stage;
pub mod types;
pub mod workflow;

pub use amount::parse_ui_amount;
pub use config::{EngineConfig, DEVNET_RPC_URL};
pub use error::{ConfigError, LedgerError, SignerError, TokenError};
pub use identity::{
    IdentityProvider, Keypair, KeypairIdentity, SignedTransaction, UnsignedTransaction,
};
pub use ledger::{ConfirmationOutcome, LedgerClient, MemoryLedger, RpcLedgerClient};
pub use logging::init_logging;
pub use orchestrator::TransactionOrchestrator;
pub use poller::{BalanceFeed, BalancePoller, PollingHandle};
pub use resolver::{associated_account, AccountResolver};
pub use session::{TokenSession, NOTIFICATION_BUFFER};
pub use stage::{OperationKind, OperationStatus, OperationTracker, Stage};
pub use types::{
    Address, AssociatedAccount, BalanceSample, Blockhash, Commitment, FreshnessToken,
    Notification, Severity, Signature, TokenHandle, LAMPORTS_PER_SOL, TOKEN_DECIMALS,
};
pub use workflow::TokenWorkflow;
