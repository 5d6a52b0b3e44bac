use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::{IdentityProvider, SignedTransaction, UnsignedTransaction};
use crate::error::SignerError;
use crate::types::Address;
use chain_sol::SolError;

/// An Ed25519 keypair held in memory.
///
/// The secret seed is wiped when the keypair is dropped.
pub struct Keypair {
    secret: Zeroizing<[u8; 32]>,
    address: Address,
}

impl Keypair {
    /// A fresh random keypair, e.g. for a new mint account.
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *secret);
        Self::from_secret(secret)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_secret(Zeroizing::new(seed))
    }

    fn from_secret(secret: Zeroizing<[u8; 32]>) -> Self {
        let address = Address::new(chain_sol::public_key_from_private(&secret));
        Self { secret, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Fill this key's signature slot in `wire`.
    pub fn sign(&self, wire: &[u8]) -> Result<Vec<u8>, SolError> {
        chain_sol::sign_transaction_slot(&self.secret, wire)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// A wallet backed by a local keypair.
///
/// It can be disconnected and reconnected, and told to reject signing
/// requests as a user would.
#[derive(Debug)]
pub struct KeypairIdentity {
    keypair: Keypair,
    connected: AtomicBool,
    approve: AtomicBool,
    sign_requests: AtomicUsize,
}

impl KeypairIdentity {
    /// A connected identity that approves every request.
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            connected: AtomicBool::new(true),
            approve: AtomicBool::new(true),
            sign_requests: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Approve (`true`) or reject (`false`) subsequent signing requests.
    pub fn set_approval(&self, approve: bool) {
        self.approve.store(approve, Ordering::SeqCst);
    }

    /// Number of signing requests received so far.
    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for KeypairIdentity {
    fn current_address(&self) -> Option<Address> {
        self.is_connected().then(|| self.keypair.address())
    }

    async fn sign_transaction(
        &self,
        transaction: UnsignedTransaction,
    ) -> Result<SignedTransaction, SignerError> {
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        // Approval happens out of process; give other tasks a turn.
        tokio::task::yield_now().await;

        if !self.is_connected() {
            return Err(SignerError::Disconnected);
        }
        if !self.approve.load(Ordering::SeqCst) {
            return Err(SignerError::Rejected);
        }

        self.keypair
            .sign(transaction.as_bytes())
            .map(SignedTransaction::new)
            .map_err(|e| SignerError::Failed(e.to_string()))
    }
}
