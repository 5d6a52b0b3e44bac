//! The three token operations.
//!
//! [`TokenWorkflow`] holds no token state of its own: the caller passes the
//! current [`TokenHandle`] in and receives a new one from
//! [`TokenWorkflow::create_token`].

use std::sync::Arc;

use chain_sol::MINT_SIZE;
use tokio::sync::watch;
use tracing::info;

use crate::amount::parse_ui_amount;
use crate::error::TokenError;
use crate::identity::{IdentityProvider, Keypair};
use crate::instructions::{build_create_mint, build_mint_to, build_transfer, mint_amount_raw};
use crate::ledger::LedgerClient;
use crate::orchestrator::TransactionOrchestrator;
use crate::poller::BalanceFeed;
use crate::resolver::AccountResolver;
use crate::stage::{OperationKind, OperationStatus, OperationTracker, Stage};
use crate::types::{Address, Commitment, Signature, TokenHandle, TOKEN_DECIMALS};

pub struct TokenWorkflow<L, I> {
    ledger: Arc<L>,
    orchestrator: TransactionOrchestrator<L, I>,
    resolver: AccountResolver<L, I>,
    status: Arc<watch::Sender<OperationStatus>>,
}

impl<L, I> TokenWorkflow<L, I>
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
        let orchestrator =
            TransactionOrchestrator::new(Arc::clone(&ledger), identity, feed, commitment);
        let resolver = AccountResolver::new(Arc::clone(&ledger), orchestrator.clone());
        let (status, _) = watch::channel(OperationStatus::default());
        Self {
            ledger,
            orchestrator,
            resolver,
            status: Arc::new(status),
        }
    }

    /// Stage of the most recent operation.
    pub fn status(&self) -> watch::Receiver<OperationStatus> {
        self.status.subscribe()
    }

    fn tracker(&self, kind: OperationKind) -> OperationTracker {
        OperationTracker::with_publisher(kind, Arc::clone(&self.status))
    }

    /// Create a new 9-decimal mint whose mint and freeze authority is the
    /// connected identity.
    pub async fn create_token(&self) -> Result<TokenHandle, TokenError> {
        let tracker = self.tracker(OperationKind::Create);
        let result = self.run_create(&tracker).await;
        tracker.finish(&result);
        result
    }

    async fn run_create(&self, tracker: &OperationTracker) -> Result<TokenHandle, TokenError> {
        let payer = self.orchestrator.payer()?;

        tracker.advance(Stage::Building);
        let rent = self
            .ledger
            .minimum_balance_for_rent_exemption(MINT_SIZE)
            .await
            .map_err(TokenError::LedgerUnavailable)?;
        let mint = Keypair::generate();
        let instruction =
            build_create_mint(&payer, &mint.address(), &payer, TOKEN_DECIMALS, rent)?;

        let signature = self
            .orchestrator
            .submit(instruction.into_instructions(), &[&mint], tracker)
            .await?;

        let token = TokenHandle::new(mint.address());
        info!(mint = %token.mint(), %signature, "token created");
        Ok(token)
    }

    /// Mint one whole token into the identity's own account, creating the
    /// account first if needed.
    pub async fn mint_token(&self, token: Option<&TokenHandle>) -> Result<Signature, TokenError> {
        let tracker = self.tracker(OperationKind::Mint);
        let result = self.run_mint(token, &tracker).await;
        tracker.finish(&result);
        result
    }

    async fn run_mint(
        &self,
        token: Option<&TokenHandle>,
        tracker: &OperationTracker,
    ) -> Result<Signature, TokenError> {
        let payer = self.orchestrator.payer()?;
        let token = token.ok_or(TokenError::TokenNotCreated)?;

        tracker.advance(Stage::Resolving);
        let destination = self.resolver.resolve(&payer, token).await?;

        tracker.advance(Stage::Building);
        let raw = mint_amount_raw();
        let instruction = build_mint_to(token, &destination.address, &payer, raw)?;

        let signature = self
            .orchestrator
            .submit(vec![instruction], &[], tracker)
            .await?;
        info!(
            mint = %token.mint(),
            account = %destination.address,
            raw,
            %signature,
            "tokens minted"
        );
        Ok(signature)
    }

    /// Transfer `amount` (decimal text, whole tokens) to `recipient`'s
    /// account, creating that account if needed.
    pub async fn send_token(
        &self,
        token: Option<&TokenHandle>,
        recipient: &str,
        amount: &str,
    ) -> Result<Signature, TokenError> {
        let tracker = self.tracker(OperationKind::Send);
        let result = self.run_send(token, recipient, amount, &tracker).await;
        tracker.finish(&result);
        result
    }

    async fn run_send(
        &self,
        token: Option<&TokenHandle>,
        recipient: &str,
        amount: &str,
        tracker: &OperationTracker,
    ) -> Result<Signature, TokenError> {
        let payer = self.orchestrator.payer()?;
        let token = token.ok_or(TokenError::TokenNotCreated)?;
        let recipient: Address = recipient
            .parse()
            .map_err(|e| TokenError::InvalidInput(format!("recipient address: {e}")))?;
        let raw = parse_ui_amount(amount, TOKEN_DECIMALS)?;

        tracker.advance(Stage::Resolving);
        let source = self.resolver.resolve(&payer, token).await?;
        let destination = self.resolver.resolve(&recipient, token).await?;

        tracker.advance(Stage::Building);
        let instruction = build_transfer(&source.address, &destination.address, &payer, raw)?;

        let signature = self
            .orchestrator
            .submit(vec![instruction], &[], tracker)
            .await?;
        info!(mint = %token.mint(), %recipient, raw, %signature, "tokens sent");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeypairIdentity;
    use crate::ledger::MemoryLedger;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        identity: Arc<KeypairIdentity>,
        workflow: TokenWorkflow<MemoryLedger, KeypairIdentity>,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let identity = Arc::new(KeypairIdentity::new(Keypair::from_seed([1u8; 32])));
        ledger.airdrop(&identity.address(), 10_000_000_000);
        let workflow = TokenWorkflow::new(
            Arc::clone(&ledger),
            Arc::clone(&identity),
            BalanceFeed::new(Arc::clone(&ledger)),
            Commitment::Confirmed,
        );
        Harness {
            ledger,
            identity,
            workflow,
        }
    }

    #[tokio::test]
    async fn create_token_initialises_mint() {
        let h = harness();
        let status = h.workflow.status();

        let token = h.workflow.create_token().await.unwrap();

        let mint = h.ledger.mint_state(token.mint()).unwrap();
        assert_eq!(mint.decimals, TOKEN_DECIMALS);
        assert_eq!(mint.mint_authority, Some(h.identity.address()));
        assert_eq!(mint.freeze_authority, Some(h.identity.address()));
        assert_eq!(
            *status.borrow(),
            OperationStatus {
                kind: Some(OperationKind::Create),
                stage: Stage::Done,
            }
        );
    }

    #[tokio::test]
    async fn mint_token_credits_one_whole_token() {
        let h = harness();
        let token = h.workflow.create_token().await.unwrap();

        h.workflow.mint_token(Some(&token)).await.unwrap();
        h.workflow.mint_token(Some(&token)).await.unwrap();

        assert_eq!(
            h.ledger.token_balance(&h.identity.address(), token.mint()),
            2_000_000_000
        );
        assert_eq!(h.ledger.mint_state(token.mint()).unwrap().supply, 2_000_000_000);
    }

    #[tokio::test]
    async fn mint_and_send_without_token_make_no_ledger_calls() {
        let h = harness();

        let err = h.workflow.mint_token(None).await.unwrap_err();
        assert!(matches!(err, TokenError::TokenNotCreated));
        let err = h
            .workflow
            .send_token(None, &h.identity.address().to_string(), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::TokenNotCreated));

        assert_eq!(h.ledger.calls().total(), 0);
        assert_eq!(h.workflow.status().borrow().stage, Stage::Failed);
    }

    #[tokio::test]
    async fn operations_without_identity_make_no_ledger_calls() {
        let h = harness();
        h.identity.disconnect();
        let token = TokenHandle::new(Keypair::from_seed([8u8; 32]).address());

        assert!(matches!(
            h.workflow.create_token().await,
            Err(TokenError::NotConnected)
        ));
        assert!(matches!(
            h.workflow.mint_token(Some(&token)).await,
            Err(TokenError::NotConnected)
        ));
        assert!(matches!(
            h.workflow.send_token(Some(&token), "x", "1").await,
            Err(TokenError::NotConnected)
        ));
        assert_eq!(h.ledger.calls().total(), 0);
    }

    #[tokio::test]
    async fn bad_send_input_is_rejected_before_the_ledger() {
        let h = harness();
        let token = TokenHandle::new(Keypair::from_seed([8u8; 32]).address());
        let recipient = Keypair::from_seed([2u8; 32]).address().to_string();

        let cases = [
            ("not-an-address", "1"),
            (recipient.as_str(), "abc"),
            (recipient.as_str(), "-1"),
        ];
        for (to, amount) in cases {
            let err = h
                .workflow
                .send_token(Some(&token), to, amount)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_input", "{to} {amount}");
        }
        assert_eq!(h.ledger.calls().total(), 0);
    }

    #[tokio::test]
    async fn send_moves_tokens_and_creates_recipient_account() {
        let h = harness();
        let token = h.workflow.create_token().await.unwrap();
        h.workflow.mint_token(Some(&token)).await.unwrap();
        let recipient = Keypair::from_seed([2u8; 32]).address();

        h.workflow
            .send_token(Some(&token), &recipient.to_string(), "0.25")
            .await
            .unwrap();

        assert_eq!(
            h.ledger.token_balance(&h.identity.address(), token.mint()),
            750_000_000
        );
        assert_eq!(h.ledger.token_balance(&recipient, token.mint()), 250_000_000);
    }

    #[tokio::test]
    async fn overspending_is_a_submission_failure() {
        let h = harness();
        let token = h.workflow.create_token().await.unwrap();
        h.workflow.mint_token(Some(&token)).await.unwrap();
        let recipient = Keypair::from_seed([2u8; 32]).address();

        let err = h
            .workflow
            .send_token(Some(&token), &recipient.to_string(), "5")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "submission_failure");
        assert_eq!(
            h.ledger.token_balance(&h.identity.address(), token.mint()),
            1_000_000_000
        );
    }

    #[tokio::test]
    async fn rejected_mint_signature_leaves_state_unchanged() {
        let h = harness();
        let token = h.workflow.create_token().await.unwrap();
        h.workflow.mint_token(Some(&token)).await.unwrap();
        let supply = h.ledger.mint_state(token.mint()).unwrap().supply;
        let balance_queries = h.ledger.calls().get_balance;

        h.identity.set_approval(false);
        let err = h.workflow.mint_token(Some(&token)).await.unwrap_err();

        assert_eq!(err.kind(), "signing_denied");
        assert_eq!(h.ledger.mint_state(token.mint()).unwrap().supply, supply);
        assert_eq!(h.ledger.calls().get_balance, balance_queries);
    }
}
