//! Solana address handling.
//!
//! Solana addresses are Base58-encoded 32-byte values: either Ed25519 public
//! keys (wallets, mints) or off-curve program derived addresses (associated
//! token accounts). No hashing is involved in the encoding.

use zeroize::Zeroize;

use crate::error::SolError;

/// Derive the Ed25519 public key for a 32-byte private key seed.
///
/// The local copy of the seed is wiped before returning.
pub fn public_key_from_private(private_key: &[u8; 32]) -> [u8; 32] {
    let mut seed = *private_key;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    seed.zeroize();
    signing_key.verifying_key().to_bytes()
}

/// Decode a Solana address string to its 32-byte representation.
///
/// A valid address decodes from Base58 to exactly 32 bytes.
pub fn address_to_bytes(address: &str) -> Result<[u8; 32], SolError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(SolError::InvalidAddress("address is empty".into()));
    }

    let bytes = bs58::decode(trimmed)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })?;

    Ok(arr)
}

/// Encode 32 bytes as a Solana address (Base58 string).
pub fn bytes_to_address(bytes: &[u8; 32]) -> String {
    bs58::encode(bytes).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_program_address() {
        let zeros = [0u8; 32];
        assert_eq!(bytes_to_address(&zeros), "11111111111111111111111111111111");
    }

    #[test]
    fn token_program_address_decodes() {
        let address = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        let bytes = address_to_bytes(address).unwrap();
        assert_eq!(bytes_to_address(&bytes), address);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let bytes = address_to_bytes("  11111111111111111111111111111111\n").unwrap();
        assert_eq!(bytes, [0u8; 32]);
    }

    #[test]
    fn public_key_matches_dalek() {
        let private_key = [0x42u8; 32];
        let expected = ed25519_dalek::SigningKey::from_bytes(&private_key)
            .verifying_key()
            .to_bytes();
        assert_eq!(public_key_from_private(&private_key), expected);
    }

    #[test]
    fn derived_public_key_encodes_as_valid_address() {
        let pubkey = public_key_from_private(&[7u8; 32]);
        let address = bytes_to_address(&pubkey);
        assert_eq!(address_to_bytes(&address).unwrap(), pubkey);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(address_to_bytes("not-a-valid-address!!!").is_err());
    }

    #[test]
    fn empty_is_rejected() {
        let err = address_to_bytes("   ").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn short_input_is_rejected() {
        // "1" decodes to a single zero byte.
        let err = address_to_bytes("1").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }
}
