//! The connected wallet.
//!
//! An [`IdentityProvider`] supplies the active address and signs
//! transactions on request. The engine never sees a private key of the
//! connected identity; [`KeypairIdentity`] is a local stand-in used by tests
//! and tooling.

use std::future::Future;

use crate::error::SignerError;
use crate::types::Address;

pub mod keypair;

pub use keypair::{Keypair, KeypairIdentity};

/// Wire bytes of a transaction whose fee-payer slot is still empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction(Vec<u8>);

impl UnsignedTransaction {
    pub fn new(wire: Vec<u8>) -> Self {
        Self(wire)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Wire bytes returned by the identity after signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction(Vec<u8>);

impl SignedTransaction {
    pub fn new(wire: Vec<u8>) -> Self {
        Self(wire)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// A wallet session.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Address of the connected account, `None` while disconnected.
    fn current_address(&self) -> Option<Address>;

    /// Whether the wallet can sign at all (watch-only wallets cannot).
    fn can_sign(&self) -> bool {
        true
    }

    /// Ask the wallet to sign. May wait indefinitely for user approval.
    fn sign_transaction(
        &self,
        transaction: UnsignedTransaction,
    ) -> impl Future<Output = Result<SignedTransaction, SignerError>> + Send;
}
