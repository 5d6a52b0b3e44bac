//! Turns a list of instructions into one confirmed transaction.
//!
//! The sequence is fixed: fetch a blockhash, compile with the connected
//! identity as fee payer, let co-signers and then the identity sign, check
//! the blockhash is still valid, submit, wait for confirmation and refresh
//! the balance. Nothing is retried. Each failure maps to its own
//! [`TokenError`] variant.

use std::sync::Arc;

use chain_sol::SolInstruction;
use tracing::{debug, info, warn};

use crate::error::TokenError;
use crate::identity::{IdentityProvider, Keypair, UnsignedTransaction};
use crate::ledger::{ConfirmationOutcome, LedgerClient};
use crate::poller::BalanceFeed;
use crate::stage::{OperationTracker, Stage};
use crate::types::{Address, Commitment, Signature};

pub struct TransactionOrchestrator<L, I> {
    ledger: Arc<L>,
    identity: Arc<I>,
    feed: BalanceFeed<L>,
    commitment: Commitment,
}

impl<L, I> Clone for TransactionOrchestrator<L, I> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            identity: Arc::clone(&self.identity),
            feed: self.feed.clone(),
            commitment: self.commitment,
        }
    }
}

impl<L, I> TransactionOrchestrator<L, I>
where
    L: LedgerClient,
    I: IdentityProvider,
{
    pub fn new(
        ledger: Arc<L>,
        identity: Arc<I>,
        feed: BalanceFeed<L>,
        commitment: Commitment,
    ) -> Self {
        Self {
            ledger,
            identity,
            feed,
            commitment,
        }
    }

    /// Address of the connected identity if it can sign.
    pub fn payer(&self) -> Result<Address, TokenError> {
        self.identity
            .current_address()
            .filter(|_| self.identity.can_sign())
            .ok_or(TokenError::NotConnected)
    }

    /// Submit `instructions` as one atomic transaction and wait for it to
    /// confirm.
    ///
    /// `co_signers` sign before the identity is asked. Instructions keep the
    /// order given.
    pub async fn submit(
        &self,
        instructions: Vec<SolInstruction>,
        co_signers: &[&Keypair],
        tracker: &OperationTracker,
    ) -> Result<Signature, TokenError> {
        let operation = tracker.kind().as_str();
        let payer = self.payer()?;
        let feed_epoch = self.feed.epoch();

        let freshness = self
            .ledger
            .get_latest_blockhash()
            .await
            .map_err(TokenError::LedgerUnavailable)?;
        debug!(
            operation,
            blockhash = %freshness.blockhash,
            last_valid_block_height = freshness.last_valid_block_height,
            "fetched blockhash"
        );

        let message = chain_sol::compile_transaction(
            &instructions,
            payer.as_bytes(),
            freshness.blockhash.as_bytes(),
        )?;
        let mut wire = chain_sol::serialize_unsigned(&message)?;
        for co_signer in co_signers {
            wire = co_signer.sign(&wire)?;
        }
        let expected_message = chain_sol::serialize_message(&message)?;

        tracker.advance(Stage::Signing);
        info!(operation, %payer, instructions = instructions.len(), "requesting signature");
        let signed = self
            .identity
            .sign_transaction(UnsignedTransaction::new(wire))
            .await
            .map_err(|e| {
                warn!(operation, error = %e, "signature request failed");
                TokenError::from(e)
            })?
            .into_bytes();
        check_signed_envelope(&signed, &expected_message)?;

        tracker.advance(Stage::Submitting);
        let still_valid = self
            .ledger
            .is_blockhash_valid(&freshness)
            .await
            .map_err(TokenError::LedgerUnavailable)?;
        if !still_valid {
            return Err(TokenError::FreshnessExpired);
        }

        let signature = self
            .ledger
            .send_transaction(&signed)
            .await
            .map_err(TokenError::SubmissionFailure)?;
        info!(operation, %signature, "transaction submitted");

        tracker.advance(Stage::Confirming);
        match self
            .ledger
            .confirm_transaction(&signature, self.commitment)
            .await
        {
            Ok(ConfirmationOutcome::Confirmed) => {}
            Ok(ConfirmationOutcome::Failed(reason)) => {
                return Err(TokenError::ConfirmationFailure(reason))
            }
            Err(e) => return Err(TokenError::ConfirmationFailure(e.to_string())),
        }
        info!(operation, %signature, commitment = %self.commitment, "transaction confirmed");

        if self.identity.current_address() != Some(payer) {
            debug!(operation, %payer, "identity changed, skipping balance refresh");
        } else if let Err(e) = self.feed.refresh_in_epoch(&payer, feed_epoch).await {
            warn!(operation, %payer, error = %e, "balance refresh after confirmation failed");
        }

        Ok(signature)
    }
}

/// The identity must return the message it was given, fully signed.
fn check_signed_envelope(signed: &[u8], expected_message: &[u8]) -> Result<(), TokenError> {
    let decoded = chain_sol::decode_transaction(signed).map_err(|e| {
        TokenError::SigningDenied(format!("wallet returned malformed transaction: {e}"))
    })?;
    if decoded.message_bytes != expected_message {
        return Err(TokenError::SigningDenied(
            "wallet altered the transaction message".into(),
        ));
    }
    chain_sol::verify_transaction_signatures(signed).map_err(|e| {
        TokenError::SigningDenied(format!("wallet returned invalid signatures: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::SignerError;
    use crate::identity::{KeypairIdentity, SignedTransaction};
    use crate::ledger::MemoryLedger;
    use crate::stage::OperationKind;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        identity: Arc<KeypairIdentity>,
        orchestrator: TransactionOrchestrator<MemoryLedger, KeypairIdentity>,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let identity = Arc::new(KeypairIdentity::new(Keypair::from_seed([1u8; 32])));
        ledger.airdrop(&identity.address(), 5_000_000_000);
        let orchestrator = TransactionOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&identity),
            BalanceFeed::new(Arc::clone(&ledger)),
            Commitment::Confirmed,
        );
        Harness {
            ledger,
            identity,
            orchestrator,
        }
    }

    fn create_mint_instructions(payer: &Address, mint: &Keypair) -> Vec<SolInstruction> {
        crate::instructions::build_create_mint(
            payer,
            &mint.address(),
            payer,
            9,
            crate::ledger::memory::rent_exempt_minimum(chain_sol::MINT_SIZE),
        )
        .unwrap()
        .into_instructions()
    }

    #[tokio::test]
    async fn submits_and_confirms_with_co_signer() {
        let h = harness();
        let mint = Keypair::generate();
        let tracker = OperationTracker::new(OperationKind::Create);
        let instructions = create_mint_instructions(&h.identity.address(), &mint);

        let signature = h
            .orchestrator
            .submit(instructions, &[&mint], &tracker)
            .await
            .unwrap();

        assert_eq!(h.ledger.submitted(), vec![signature]);
        assert!(h.ledger.mint_state(&mint.address()).is_some());
        assert_eq!(tracker.stage(), Stage::Confirming);
        // Confirmation triggers one balance query.
        assert_eq!(h.ledger.calls().get_balance, 1);
        let calls = h.ledger.calls();
        assert_eq!(calls.get_latest_blockhash, 1);
        assert_eq!(calls.is_blockhash_valid, 1);
        assert_eq!(calls.confirm_transaction, 1);
    }

    #[tokio::test]
    async fn disconnected_identity_fails_before_any_call() {
        let h = harness();
        h.identity.disconnect();
        let tracker = OperationTracker::new(OperationKind::Create);
        let mint = Keypair::generate();

        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &tracker,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::NotConnected));
        assert_eq!(h.ledger.calls().total(), 0);
    }

    #[tokio::test]
    async fn ledger_down_is_unavailable() {
        let h = harness();
        h.ledger.set_unavailable(true);
        let mint = Keypair::generate();
        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ledger_unavailable");
        assert_eq!(h.identity.sign_requests(), 0);
    }

    #[tokio::test]
    async fn rejected_signature_submits_nothing_and_skips_refresh() {
        let h = harness();
        h.identity.set_approval(false);
        let before = h.ledger.balance(&h.identity.address());
        let mint = Keypair::generate();
        let tracker = OperationTracker::new(OperationKind::Create);

        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &tracker,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "signing_denied");
        assert_eq!(tracker.stage(), Stage::Signing);
        let calls = h.ledger.calls();
        assert_eq!(calls.send_transaction, 0);
        assert_eq!(calls.get_balance, 0);
        assert_eq!(h.ledger.balance(&h.identity.address()), before);
        assert!(h.ledger.mint_state(&mint.address()).is_none());
    }

    #[tokio::test]
    async fn stale_blockhash_is_not_submitted() {
        let h = harness();
        h.ledger.set_stale_blockhashes(true);
        let mint = Keypair::generate();

        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::FreshnessExpired));
        assert_eq!(h.ledger.calls().send_transaction, 0);
    }

    #[tokio::test]
    async fn rejected_submission_is_reported() {
        let h = harness();
        h.ledger.set_reject_submissions(true);
        let mint = Keypair::generate();

        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "submission_failure");
        assert_eq!(h.ledger.calls().send_transaction, 1);
        assert_eq!(h.ledger.calls().confirm_transaction, 0);
    }

    #[tokio::test]
    async fn confirmation_failure_is_reported_without_retry() {
        let h = harness();
        h.ledger.set_fail_confirmations(true);
        let mint = Keypair::generate();

        let err = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "confirmation_failure");
        let calls = h.ledger.calls();
        assert_eq!(calls.send_transaction, 1);
        assert_eq!(calls.confirm_transaction, 1);
        assert_eq!(calls.get_balance, 0);
    }

    #[tokio::test]
    async fn failed_balance_refresh_does_not_fail_the_operation() {
        let h = harness();
        h.ledger.set_fail_balance_queries(true);
        let mint = Keypair::generate();

        let result = h
            .orchestrator
            .submit(
                create_mint_instructions(&h.identity.address(), &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(h.ledger.calls().get_balance, 1);
    }

    /// Approves the request, then disconnects before it confirms.
    struct LeavingIdentity {
        inner: KeypairIdentity,
    }

    impl IdentityProvider for LeavingIdentity {
        fn current_address(&self) -> Option<Address> {
            self.inner.current_address()
        }

        async fn sign_transaction(
            &self,
            transaction: UnsignedTransaction,
        ) -> Result<SignedTransaction, SignerError> {
            let signed = self.inner.sign_transaction(transaction).await;
            self.inner.disconnect();
            signed
        }
    }

    #[tokio::test]
    async fn no_balance_refresh_for_an_identity_that_left() {
        let ledger = Arc::new(MemoryLedger::new());
        let identity = Arc::new(LeavingIdentity {
            inner: KeypairIdentity::new(Keypair::from_seed([4u8; 32])),
        });
        let payer = identity.inner.address();
        ledger.airdrop(&payer, 5_000_000_000);
        let feed = BalanceFeed::new(Arc::clone(&ledger));
        let orchestrator = TransactionOrchestrator::new(
            Arc::clone(&ledger),
            identity,
            feed.clone(),
            Commitment::Confirmed,
        );
        let mint = Keypair::generate();

        orchestrator
            .submit(
                create_mint_instructions(&payer, &mint),
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap();

        assert!(ledger.mint_state(&mint.address()).is_some());
        assert_eq!(ledger.calls().get_balance, 0);
        assert!(feed.latest().is_none());
    }

    /// Signs with its key but swaps in a different message first.
    struct TamperingIdentity {
        keypair: Keypair,
        calls: AtomicUsize,
    }

    impl IdentityProvider for TamperingIdentity {
        fn current_address(&self) -> Option<Address> {
            Some(self.keypair.address())
        }

        async fn sign_transaction(
            &self,
            transaction: UnsignedTransaction,
        ) -> Result<SignedTransaction, SignerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let decoded = chain_sol::decode_transaction(transaction.as_bytes())
                .map_err(|e| SignerError::Failed(e.to_string()))?;
            let mut message = decoded.message;
            message.recent_blockhash = [0xEE; 32];
            let wire = chain_sol::serialize_unsigned(&message)
                .map_err(|e| SignerError::Failed(e.to_string()))?;
            self.keypair
                .sign(&wire)
                .map(SignedTransaction::new)
                .map_err(|e| SignerError::Failed(e.to_string()))
        }
    }

    #[tokio::test]
    async fn altered_envelope_is_refused() {
        let ledger = Arc::new(MemoryLedger::new());
        let identity = Arc::new(TamperingIdentity {
            keypair: Keypair::from_seed([5u8; 32]),
            calls: AtomicUsize::new(0),
        });
        let payer = identity.keypair.address();
        ledger.airdrop(&payer, 5_000_000_000);
        let orchestrator = TransactionOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&identity),
            BalanceFeed::new(Arc::clone(&ledger)),
            Commitment::Confirmed,
        );
        let (ix, _) = chain_sol::build_create_associated_token_account_idempotent(
            payer.as_bytes(),
            payer.as_bytes(),
            &[9u8; 32],
        )
        .unwrap();

        let err = orchestrator
            .submit(vec![ix], &[], &OperationTracker::new(OperationKind::Mint))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("altered"), "{err}");
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.calls().send_transaction, 0);
    }

    #[test]
    fn signed_envelope_must_carry_every_signature() {
        let payer = Keypair::from_seed([1u8; 32]);
        let mint = Keypair::from_seed([2u8; 32]);
        let message = chain_sol::compile_transaction(
            &create_mint_instructions(&payer.address(), &mint),
            payer.address().as_bytes(),
            &[3u8; 32],
        )
        .unwrap();
        let unsigned = chain_sol::serialize_unsigned(&message).unwrap();
        let expected = chain_sol::serialize_message(&message).unwrap();

        let payer_only = payer.sign(&unsigned).unwrap();
        assert!(check_signed_envelope(&payer_only, &expected).is_err());

        let both = mint.sign(&payer_only).unwrap();
        check_signed_envelope(&both, &expected).unwrap();
    }
}
