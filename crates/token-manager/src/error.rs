use chain_sol::SolError;
use thiserror::Error;

/// Errors reported by a [`crate::ledger::LedgerClient`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected rpc response: {0}")]
    InvalidResponse(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout(e.to_string())
        } else if e.is_decode() {
            LedgerError::InvalidResponse(e.to_string())
        } else {
            LedgerError::Transport(e.to_string())
        }
    }
}

/// Errors reported by an [`crate::identity::IdentityProvider`] when asked
/// to sign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("user rejected the request")]
    Rejected,

    #[error("wallet disconnected")]
    Disconnected,

    #[error("signer failed: {0}")]
    Failed(String),
}

/// Failure of a token operation (create, mint, send).
///
/// Every variant is recovered at the operation boundary and turned into a
/// failure notification; the `Display` text is what the user sees.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Wallet not connected!")]
    NotConnected,

    #[error("Token not created!")]
    TokenNotCreated,

    #[error("could not resolve token account: {0}")]
    ResolutionFailure(#[source] LedgerError),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(#[source] LedgerError),

    #[error("signing denied: {0}")]
    SigningDenied(String),

    #[error("recent blockhash expired before submission")]
    FreshnessExpired,

    #[error("submission failed: {0}")]
    SubmissionFailure(#[source] LedgerError),

    #[error("confirmation failed: {0}")]
    ConfirmationFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TokenError {
    /// Stable name of the error class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::NotConnected => "not_connected",
            TokenError::TokenNotCreated => "token_not_created",
            TokenError::ResolutionFailure(_) => "resolution_failure",
            TokenError::LedgerUnavailable(_) => "ledger_unavailable",
            TokenError::SigningDenied(_) => "signing_denied",
            TokenError::FreshnessExpired => "freshness_expired",
            TokenError::SubmissionFailure(_) => "submission_failure",
            TokenError::ConfirmationFailure(_) => "confirmation_failure",
            TokenError::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<SolError> for TokenError {
    fn from(e: SolError) -> Self {
        TokenError::InvalidInput(e.to_string())
    }
}

impl From<SignerError> for TokenError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Disconnected => TokenError::NotConnected,
            other => TokenError::SigningDenied(other.to_string()),
        }
    }
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("cannot build ledger client: {0}")]
    LedgerClient(#[from] LedgerError),
}
