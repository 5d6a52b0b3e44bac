//! Associated token account lookup.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::TokenError;
use crate::identity::IdentityProvider;
use crate::ledger::LedgerClient;
use crate::orchestrator::TransactionOrchestrator;
use crate::stage::{OperationKind, OperationTracker, Stage};
use crate::types::{Address, AssociatedAccount, TokenHandle};

/// Derive the associated token account of `owner` for `token`. No I/O.
pub fn associated_account(
    owner: &Address,
    token: &TokenHandle,
) -> Result<AssociatedAccount, TokenError> {
    let address =
        chain_sol::derive_associated_token_address(owner.as_bytes(), token.mint().as_bytes())?;
    Ok(AssociatedAccount {
        owner: *owner,
        mint: *token.mint(),
        address: Address::new(address),
    })
}

pub struct AccountResolver<L, I> {
    ledger: Arc<L>,
    orchestrator: TransactionOrchestrator<L, I>,
}

impl<L, I> Clone for AccountResolver<L, I> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<L, I> AccountResolver<L, I>
where
    L: LedgerClient,
    I: IdentityProvider,
{
    pub fn new(ledger: Arc<L>, orchestrator: TransactionOrchestrator<L, I>) -> Self {
        Self {
            ledger,
            orchestrator,
        }
    }

    /// Return `owner`'s account for `token`, creating it first if the
    /// ledger does not have it yet.
    ///
    /// Creation is submitted as its own transaction paid by the connected
    /// identity and uses the idempotent instruction, so a concurrent
    /// creation of the same account cannot make it fail. Ledger errors
    /// while creating surface as [`TokenError::ResolutionFailure`]; signing
    /// and freshness failures keep their own variants.
    pub async fn resolve(
        &self,
        owner: &Address,
        token: &TokenHandle,
    ) -> Result<AssociatedAccount, TokenError> {
        let account = associated_account(owner, token)?;

        let exists = self
            .ledger
            .account_exists(&account.address)
            .await
            .map_err(TokenError::ResolutionFailure)?;
        if exists {
            debug!(owner = %account.owner, account = %account.address, "token account exists");
            return Ok(account);
        }

        let payer = self.orchestrator.payer()?;
        let (instruction, _) = chain_sol::build_create_associated_token_account_idempotent(
            payer.as_bytes(),
            owner.as_bytes(),
            token.mint().as_bytes(),
        )?;

        info!(owner = %account.owner, account = %account.address, "creating token account");
        let tracker = OperationTracker::new(OperationKind::CreateAccount);
        tracker.advance(Stage::Building);
        let result = self
            .orchestrator
            .submit(vec![instruction], &[], &tracker)
            .await;
        tracker.finish(&result);
        result.map_err(|e| match e {
            TokenError::LedgerUnavailable(ledger) | TokenError::SubmissionFailure(ledger) => {
                TokenError::ResolutionFailure(ledger)
            }
            other => other,
        })?;

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::identity::{Keypair, KeypairIdentity};
    use crate::ledger::memory::rent_exempt_minimum;
    use crate::ledger::MemoryLedger;
    use crate::poller::BalanceFeed;
    use crate::types::Commitment;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        identity: Arc<KeypairIdentity>,
        resolver: AccountResolver<MemoryLedger, KeypairIdentity>,
        token: TokenHandle,
    }

    async fn harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let identity = Arc::new(KeypairIdentity::new(Keypair::from_seed([1u8; 32])));
        let payer = identity.address();
        ledger.airdrop(&payer, 5_000_000_000);
        let orchestrator = TransactionOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&identity),
            BalanceFeed::new(Arc::clone(&ledger)),
            Commitment::Confirmed,
        );

        let mint = Keypair::generate();
        let instructions = crate::instructions::build_create_mint(
            &payer,
            &mint.address(),
            &payer,
            9,
            rent_exempt_minimum(chain_sol::MINT_SIZE),
        )
        .unwrap()
        .into_instructions();
        orchestrator
            .submit(
                instructions,
                &[&mint],
                &OperationTracker::new(OperationKind::Create),
            )
            .await
            .unwrap();

        Harness {
            resolver: AccountResolver::new(Arc::clone(&ledger), orchestrator),
            ledger,
            identity,
            token: TokenHandle::new(mint.address()),
        }
    }

    #[test]
    fn derivation_is_deterministic_and_per_pair() {
        let owner = Keypair::from_seed([1u8; 32]).address();
        let other = Keypair::from_seed([2u8; 32]).address();
        let token = TokenHandle::new(Keypair::from_seed([3u8; 32]).address());

        let a = associated_account(&owner, &token).unwrap();
        let b = associated_account(&owner, &token).unwrap();
        let c = associated_account(&other, &token).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.address, c.address);
        assert_eq!(a.owner, owner);
        assert_eq!(a.mint, *token.mint());
    }

    #[tokio::test]
    async fn resolving_twice_creates_once() {
        let h = harness().await;
        let owner = h.identity.address();
        let submitted_before = h.ledger.submitted().len();

        let first = h.resolver.resolve(&owner, &h.token).await.unwrap();
        let second = h.resolver.resolve(&owner, &h.token).await.unwrap();

        assert_eq!(first, second);
        assert!(h.ledger.has_account(&first.address));
        assert_eq!(h.ledger.submitted().len(), submitted_before + 1);
    }

    #[tokio::test]
    async fn creates_account_for_another_owner() {
        let h = harness().await;
        let recipient = Keypair::from_seed([9u8; 32]).address();

        let account = h.resolver.resolve(&recipient, &h.token).await.unwrap();

        assert_eq!(account.owner, recipient);
        assert!(h.ledger.has_account(&account.address));
        assert!(!h.ledger.has_account(&recipient));
    }

    #[tokio::test]
    async fn lookup_failure_is_a_resolution_failure() {
        let h = harness().await;
        h.ledger.set_unavailable(true);

        let err = h
            .resolver
            .resolve(&h.identity.address(), &h.token)
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::ResolutionFailure(_)));
        assert_eq!(err.kind(), "resolution_failure");
    }

    #[tokio::test]
    async fn rejected_creation_is_a_resolution_failure() {
        let h = harness().await;
        h.ledger.set_reject_submissions(true);
        let recipient = Keypair::from_seed([9u8; 32]).address();

        let err = h.resolver.resolve(&recipient, &h.token).await.unwrap_err();

        assert!(matches!(
            err,
            TokenError::ResolutionFailure(LedgerError::Rejected(_))
        ));
        let account = associated_account(&recipient, &h.token).unwrap();
        assert!(!h.ledger.has_account(&account.address));
    }

    #[tokio::test]
    async fn rejected_creation_signature_propagates() {
        let h = harness().await;
        h.identity.set_approval(false);
        let submitted_before = h.ledger.submitted().len();

        let err = h
            .resolver
            .resolve(&h.identity.address(), &h.token)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "signing_denied");
        assert_eq!(h.ledger.submitted().len(), submitted_before);
    }
}
