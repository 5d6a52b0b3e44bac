//! Solana primitives for the token manager.
//!
//! This crate covers everything the token workflow needs from the ledger's
//! own data formats: addresses, instruction builders for the System, SPL
//! Token and Associated Token Account programs, associated-account
//! derivation, and the compact transaction wire format (both directions).
//!
//! Like the rest of the workspace it avoids `solana-sdk`. The wire format
//! is implemented by hand on top of `ed25519-dalek` and `bs58`, and nothing
//! here performs I/O.

pub mod address;
pub mod error;
pub mod spl_token;
pub mod system;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::{address_to_bytes, bytes_to_address, public_key_from_private};
pub use error::SolError;
pub use spl_token::{
    build_create_associated_token_account_idempotent, build_initialize_mint2, build_mint_to,
    build_spl_transfer, derive_associated_token_address, parse_token_instruction,
    TokenInstruction, ASSOCIATED_TOKEN_PROGRAM_ID, ATA_CREATE_IDEMPOTENT, MINT_SIZE,
    TOKEN_ACCOUNT_SIZE, TOKEN_PROGRAM_ID,
};
pub use system::{
    build_create_account, parse_system_instruction, SystemInstruction, SYSTEM_PROGRAM_ID,
};
pub use transaction::{
    compile_transaction, decode_compact_u16, decode_transaction, encode_compact_u16,
    serialize_message, serialize_unsigned, sign_transaction_slot, transaction_id,
    verify_transaction_signatures, CompiledInstruction, DecodedTransaction, SolAccountMeta,
    SolInstruction, SolTransaction,
};
