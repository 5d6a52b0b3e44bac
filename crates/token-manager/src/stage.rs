//! Per-operation stage machine.
//!
//! Every token operation walks `Idle → Resolving → Building → Signing →
//! Submitting → Confirming → Done`, skipping stages it does not need, or
//! drops to `Failed` from any non-terminal stage. An [`OperationTracker`]
//! enforces that order and publishes the current stage.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Resolving,
    Building,
    Signing,
    Submitting,
    Confirming,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Resolving => "resolving",
            Stage::Building => "building",
            Stage::Signing => "signing",
            Stage::Submitting => "submitting",
            Stage::Confirming => "confirming",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Stage::Idle => 0,
            Stage::Resolving => 1,
            Stage::Building => 2,
            Stage::Signing => 3,
            Stage::Submitting => 4,
            Stage::Confirming => 5,
            Stage::Done | Stage::Failed => 6,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Failed => true,
            Stage::Done => *self == Stage::Confirming,
            other => other.rank() > self.rank(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user-facing operations, plus the nested account creation the
/// resolver performs on their behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Mint,
    Send,
    CreateAccount,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Mint => "mint",
            OperationKind::Send => "send",
            OperationKind::CreateAccount => "create_account",
        }
    }

    /// Notification text on success.
    pub fn success_message(&self) -> &'static str {
        match self {
            OperationKind::Create => "Token created successfully!",
            OperationKind::Mint => "Token minted successfully!",
            OperationKind::Send => "Tokens sent successfully!",
            OperationKind::CreateAccount => "Token account created successfully!",
        }
    }

    /// Notification text on failure.
    pub fn failure_message(&self, error: &TokenError) -> String {
        let prefix = match self {
            OperationKind::Create => "Error creating token",
            OperationKind::Mint => "Error minting token",
            OperationKind::Send => "Error sending token",
            OperationKind::CreateAccount => "Error creating token account",
        };
        format!("{prefix}: {error}")
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationStatus {
    /// `None` until the first operation starts.
    pub kind: Option<OperationKind>,
    pub stage: Stage,
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self {
            kind: None,
            stage: Stage::Idle,
        }
    }
}

/// Tracks the stage of one operation.
#[derive(Debug)]
pub struct OperationTracker {
    kind: OperationKind,
    stage: Mutex<Stage>,
    publisher: Option<Arc<watch::Sender<OperationStatus>>>,
}

impl OperationTracker {
    /// A tracker nobody observes.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            stage: Mutex::new(Stage::Idle),
            publisher: None,
        }
    }

    /// A tracker that publishes every transition on `publisher`.
    pub fn with_publisher(
        kind: OperationKind,
        publisher: Arc<watch::Sender<OperationStatus>>,
    ) -> Self {
        publisher.send_replace(OperationStatus {
            kind: Some(kind),
            stage: Stage::Idle,
        });
        Self {
            kind,
            stage: Mutex::new(Stage::Idle),
            publisher: Some(publisher),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`. Illegal transitions are logged and ignored; the
    /// return value says whether the move happened.
    pub fn advance(&self, next: Stage) -> bool {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *stage;
        if !current.can_advance_to(next) {
            warn!(
                operation = self.kind.as_str(),
                from = current.as_str(),
                to = next.as_str(),
                "ignoring illegal stage transition"
            );
            return false;
        }
        *stage = next;
        drop(stage);

        debug!(
            operation = self.kind.as_str(),
            from = current.as_str(),
            stage = next.as_str(),
            "stage transition"
        );
        if let Some(publisher) = &self.publisher {
            publisher.send_replace(OperationStatus {
                kind: Some(self.kind),
                stage: next,
            });
        }
        true
    }

    /// Record the terminal outcome of `result`.
    pub fn finish<T>(&self, result: &Result<T, TokenError>) {
        match result {
            Ok(_) => {
                self.advance(Stage::Done);
            }
            Err(err) => {
                warn!(
                    operation = self.kind.as_str(),
                    stage = self.stage().as_str(),
                    kind = err.kind(),
                    error = %err,
                    "operation failed"
                );
                self.advance(Stage::Failed);
            }
        }
    }
}
