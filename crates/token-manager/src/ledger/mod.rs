//! Access to the external ledger.
//!
//! [`LedgerClient`] is a trait so the workflow can run against the real
//! JSON-RPC endpoint ([`RpcLedgerClient`]) or the in-process
//! [`MemoryLedger`] used in tests.

use std::future::Future;

use crate::error::LedgerError;
use crate::types::{Address, Commitment, FreshnessToken, Signature};

pub mod memory;
pub mod rpc;

pub use memory::{LedgerCalls, MemoryLedger};
pub use rpc::RpcLedgerClient;

/// Final state of a confirmation wait that did not fail in transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The transaction reached the requested commitment.
    Confirmed,
    /// The transaction landed but its execution failed.
    Failed(String),
}

/// Operations the token workflow needs from a ledger node.
///
/// Implementors must be shareable across tasks; the workflow holds them in
/// an `Arc`.
pub trait LedgerClient: Send + Sync + 'static {
    /// Native balance of `address`, in lamports. Unknown accounts hold zero.
    fn get_balance(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// The most recent blockhash and the last block height it is valid for.
    fn get_latest_blockhash(
        &self,
    ) -> impl Future<Output = Result<FreshnessToken, LedgerError>> + Send;

    /// Whether a transaction built on `token` can still be accepted.
    fn is_blockhash_valid(
        &self,
        token: &FreshnessToken,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Whether any account is stored at `address`.
    fn account_exists(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Lamports an account of `data_len` bytes needs to be rent exempt.
    fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Raw token amount held by the token account at `address`.
    fn get_token_account_balance(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Submit a fully signed wire transaction, returning its id.
    fn send_transaction(
        &self,
        wire: &[u8],
    ) -> impl Future<Output = Result<Signature, LedgerError>> + Send;

    /// Wait until `signature` reaches `commitment` or is known to have
    /// failed.
    fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> impl Future<Output = Result<ConfirmationOutcome, LedgerError>> + Send;
}
