use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use chain_sol::SolError;
use serde::{Deserialize, Serialize};

/// Decimal places of every token this system creates.
pub const TOKEN_DECIMALS: u8 = 9;

/// Whole tokens minted per mint operation.
pub const MINT_AMOUNT_UI: u64 = 1;

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ─── Addresses and signatures ────────────────────────────────────────

/// A 32-byte ledger address (wallet, mint, or token account).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl FromStr for Address {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chain_sol::address_to_bytes(s).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&chain_sol::bytes_to_address(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// A transaction signature, which doubles as the transaction id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl FromStr for Signature {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| SolError::SerializationError(format!("signature base58: {e}")))?;
        let arr: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::SerializationError(format!("expected 64 signature bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

/// A recent blockhash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Blockhash {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chain_sol::address_to_bytes(s).map(Self)
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&chain_sol::bytes_to_address(&self.0))
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

/// A recent blockhash together with the last block height at which a
/// transaction referencing it can still land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    pub blockhash: Blockhash,
    pub last_valid_block_height: u64,
}

/// How many validators must agree before a transaction counts as landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment `{other}`")),
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Token state ─────────────────────────────────────────────────────

/// Handle to a token class created in this session.
///
/// Only the mint address is kept, in memory, for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHandle {
    mint: Address,
}

impl TokenHandle {
    pub fn new(mint: Address) -> Self {
        Self { mint }
    }

    pub fn mint(&self) -> &Address {
        &self.mint
    }
}

/// The associated token account holding `owner`'s balance of `mint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedAccount {
    pub owner: Address,
    pub mint: Address,
    pub address: Address,
}

/// A point-in-time native balance of the connected identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSample {
    pub address: Address,
    pub lamports: u64,
    pub observed_at: SystemTime,
}

impl BalanceSample {
    /// Balance in SOL, for display.
    pub fn as_sol(&self) -> f64 {
        self.lamports as f64 / LAMPORTS_PER_SOL as f64
    }
}

// ─── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Failure,
}

/// A user-visible outcome of a token operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_and_displays_base58() {
        let text = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        let address: Address = text.parse().unwrap();
        assert_eq!(address.to_string(), text);
        assert_eq!(address.as_bytes(), &chain_sol::TOKEN_PROGRAM_ID);
        assert_eq!(format!("{address:?}"), format!("Address({text})"));
    }

    #[test]
    fn malformed_address_is_rejected() {
        assert!("not an address".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn signature_roundtrips_through_base58() {
        let sig = Signature::new([0xABu8; 64]);
        let parsed: Signature = sig.to_string().parse().unwrap();
        assert_eq!(parsed, sig);
        assert!("1111".parse::<Signature>().is_err());
    }

    #[test]
    fn commitment_parses_case_insensitively() {
        assert_eq!("Confirmed".parse::<Commitment>().unwrap(), Commitment::Confirmed);
        assert_eq!(" finalized ".parse::<Commitment>().unwrap(), Commitment::Finalized);
        assert!("fast".parse::<Commitment>().is_err());
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
    }

    #[test]
    fn balance_sample_converts_to_sol() {
        let sample = BalanceSample {
            address: Address::new([1u8; 32]),
            lamports: 2_500_000_000,
            observed_at: SystemTime::UNIX_EPOCH,
        };
        assert!((sample.as_sol() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn notification_constructors() {
        assert_eq!(Notification::success("ok").severity, Severity::Success);
        assert_eq!(Notification::failure("no").severity, Severity::Failure);
    }
}
