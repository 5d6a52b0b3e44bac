//! Solana transaction wire format: compilation, signing and decoding.
//!
//! We build Solana transactions entirely by hand, without `solana-sdk`.
//! The wire format is a compact binary layout:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```
//!
//! A transaction may need several signatures (creating a mint needs the fee
//! payer and the new mint account). Unsigned transactions carry zeroed
//! signature slots, and each signer fills its own slot with
//! [`sign_transaction_slot`], so a wallet never has to see another party's
//! key.

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::error::SolError;

const SIGNATURE_LEN: usize = 64;
const EMPTY_SIGNATURE: [u8; SIGNATURE_LEN] = [0u8; SIGNATURE_LEN];

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)` or an error if the data is truncated.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;
    let mut consumed = 0usize;

    loop {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError(
                "unexpected end of data while decoding compact-u16".into(),
            )
        })?;
        value |= ((byte & 0x7f) as u32) << (7 * consumed);
        consumed += 1;

        if byte & 0x80 == 0 || consumed >= 3 {
            break;
        }
    }

    if value > u16::MAX as u32 {
        return Err(SolError::SerializationError(
            "compact-u16 value overflow".into(),
        ));
    }

    Ok((value as u16, consumed))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in a Solana instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountMeta {
    pub pubkey: [u8; 32],
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolAccountMeta {
    /// Writable signer (fee payers, funded accounts).
    pub fn signer(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: true,
        }
    }

    /// Read-only signer (authorities).
    pub fn readonly_signer(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: false,
        }
    }

    pub fn writable(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: false,
        }
    }
}

/// A Solana instruction (before it is compiled into a transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolInstruction {
    pub program_id: [u8; 32],
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// A compiled Solana transaction message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolTransaction {
    /// All account keys referenced by this transaction, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<[u8; 32]>,

    /// Number of required signatures (first N accounts are signers).
    pub num_required_signatures: u8,
    /// How many of the signing accounts are read-only.
    pub num_readonly_signed: u8,
    /// How many of the non-signing accounts are read-only.
    pub num_readonly_unsigned: u8,

    /// Recent blockhash (32 bytes).
    pub recent_blockhash: [u8; 32],

    /// Compiled instructions (account references replaced with indices).
    pub compiled_instructions: Vec<CompiledInstruction>,
}

impl SolTransaction {
    /// The fee payer (always the first account key).
    pub fn fee_payer(&self) -> Option<&[u8; 32]> {
        self.account_keys.first()
    }

    /// Public keys whose signatures this transaction requires, in slot order.
    pub fn signer_keys(&self) -> &[[u8; 32]] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    /// Whether the account at `index` may be written by the transaction.
    pub fn is_writable(&self, index: usize) -> bool {
        let num_signers = self.num_required_signatures as usize;
        let num_accounts = self.account_keys.len();
        if index >= num_accounts {
            return false;
        }
        if index < num_signers {
            index < num_signers - self.num_readonly_signed as usize
        } else {
            index < num_accounts - self.num_readonly_unsigned as usize
        }
    }
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the transaction's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    /// Index into `account_keys` for the program to invoke.
    pub program_id_index: u8,
    /// Indices into `account_keys` for each account the instruction reads/writes.
    pub account_indices: Vec<u8>,
    /// Opaque instruction data.
    pub data: Vec<u8>,
}

/// A wire transaction split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub signatures: Vec<[u8; 64]>,
    pub message: SolTransaction,
    /// The exact message bytes the signatures cover.
    pub message_bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Transaction building
// ---------------------------------------------------------------------------

/// Compile a set of instructions into a transaction message.
///
/// The fee payer is always a writable signer at index 0. Instructions keep
/// the order they were supplied in.
pub fn compile_transaction(
    instructions: &[SolInstruction],
    fee_payer: &[u8; 32],
    recent_blockhash: &[u8; 32],
) -> Result<SolTransaction, SolError> {
    if instructions.is_empty() {
        return Err(SolError::TransactionBuildError(
            "transaction has no instructions".into(),
        ));
    }

    // Instruction account lists are tiny; a Vec keeps insertion order.
    struct AccountEntry {
        pubkey: [u8; 32],
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();
    let mut upsert = |pubkey: [u8; 32], signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    upsert(*fee_payer, true, true);
    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    // Stable sort: the fee payer is a writable signer inserted first, so it
    // stays at index 0.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    if entries.len() > u8::MAX as usize {
        return Err(SolError::TransactionBuildError(format!(
            "too many accounts: {}",
            entries.len()
        )));
    }

    let count = |f: fn(&AccountEntry) -> bool| entries.iter().filter(|e| f(e)).count() as u8;
    let num_required_signatures = count(|e| e.is_signer);
    let num_readonly_signed = count(|e| e.is_signer && !e.is_writable);
    let num_readonly_unsigned = count(|e| !e.is_signer && !e.is_writable);

    let account_keys: Vec<[u8; 32]> = entries.iter().map(|e| e.pubkey).collect();
    let index_of = |key: &[u8; 32]| {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| SolError::TransactionBuildError("account not in account keys".into()))
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey))
            .collect::<Result<Vec<u8>, SolError>>()?;

        compiled.push(CompiledInstruction {
            program_id_index: index_of(&ix.program_id)?,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(SolTransaction {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        compiled_instructions: compiled,
    })
}

/// Serialize the transaction message (the bytes that get signed).
pub fn serialize_message(tx: &SolTransaction) -> Result<Vec<u8>, SolError> {
    let mut buf = Vec::with_capacity(256);

    buf.push(tx.num_required_signatures);
    buf.push(tx.num_readonly_signed);
    buf.push(tx.num_readonly_unsigned);

    buf.extend_from_slice(&encode_compact_u16(compact_len(tx.account_keys.len())?));
    for key in &tx.account_keys {
        buf.extend_from_slice(key);
    }

    buf.extend_from_slice(&tx.recent_blockhash);

    buf.extend_from_slice(&encode_compact_u16(compact_len(
        tx.compiled_instructions.len(),
    )?));
    for ix in &tx.compiled_instructions {
        buf.push(ix.program_id_index);

        buf.extend_from_slice(&encode_compact_u16(compact_len(ix.account_indices.len())?));
        buf.extend_from_slice(&ix.account_indices);

        buf.extend_from_slice(&encode_compact_u16(compact_len(ix.data.len())?));
        buf.extend_from_slice(&ix.data);
    }

    Ok(buf)
}

fn compact_len(len: usize) -> Result<u16, SolError> {
    u16::try_from(len)
        .map_err(|_| SolError::SerializationError(format!("length {len} exceeds compact-u16")))
}

/// Serialize a transaction with every signature slot zeroed.
///
/// The result is what gets handed to signers; each fills its own slot.
pub fn serialize_unsigned(tx: &SolTransaction) -> Result<Vec<u8>, SolError> {
    let message_bytes = serialize_message(tx)?;
    let num_sigs = tx.num_required_signatures as usize;

    let mut wire = Vec::with_capacity(3 + num_sigs * SIGNATURE_LEN + message_bytes.len());
    wire.extend_from_slice(&encode_compact_u16(num_sigs as u16));
    for _ in 0..num_sigs {
        wire.extend_from_slice(&EMPTY_SIGNATURE);
    }
    wire.extend_from_slice(&message_bytes);

    Ok(wire)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse wire bytes into signatures and message.
pub fn decode_transaction(wire: &[u8]) -> Result<DecodedTransaction, SolError> {
    let mut reader = Reader::new(wire);

    let num_sigs = reader.compact()? as usize;
    let mut signatures = Vec::with_capacity(num_sigs);
    for _ in 0..num_sigs {
        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(reader.take(SIGNATURE_LEN)?);
        signatures.push(sig);
    }

    let message_start = reader.pos;
    let num_required_signatures = reader.byte()?;
    let num_readonly_signed = reader.byte()?;
    let num_readonly_unsigned = reader.byte()?;

    let num_accounts = reader.compact()? as usize;
    let mut account_keys = Vec::with_capacity(num_accounts);
    for _ in 0..num_accounts {
        account_keys.push(reader.key()?);
    }
    let recent_blockhash = reader.key()?;

    let num_instructions = reader.compact()? as usize;
    let mut compiled_instructions = Vec::with_capacity(num_instructions);
    for _ in 0..num_instructions {
        let program_id_index = reader.byte()?;
        let n = reader.compact()? as usize;
        let account_indices = reader.take(n)?.to_vec();
        let len = reader.compact()? as usize;
        let data = reader.take(len)?.to_vec();

        let out_of_range = std::iter::once(&program_id_index)
            .chain(account_indices.iter())
            .any(|&i| i as usize >= num_accounts);
        if out_of_range {
            return Err(SolError::SerializationError(
                "instruction references unknown account index".into(),
            ));
        }

        compiled_instructions.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data,
        });
    }

    if reader.pos != wire.len() {
        return Err(SolError::SerializationError(format!(
            "{} trailing bytes after message",
            wire.len() - reader.pos
        )));
    }
    if num_sigs != num_required_signatures as usize || num_sigs > num_accounts {
        return Err(SolError::SerializationError(format!(
            "signature count {num_sigs} does not match header ({num_required_signatures})"
        )));
    }

    Ok(DecodedTransaction {
        signatures,
        message: SolTransaction {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash,
            compiled_instructions,
        },
        message_bytes: wire[message_start..].to_vec(),
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SolError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or_else(|| {
            SolError::SerializationError(format!("transaction truncated at byte {}", self.pos))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, SolError> {
        Ok(self.take(1)?[0])
    }

    fn key(&mut self) -> Result<[u8; 32], SolError> {
        let mut key = [0u8; 32];
        key.copy_from_slice(self.take(32)?);
        Ok(key)
    }

    fn compact(&mut self) -> Result<u16, SolError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Signing and verification
// ---------------------------------------------------------------------------

/// Sign a wire transaction in the slot belonging to `private_key`.
///
/// The transaction is parsed to find which required signer matches the
/// key's public key; that slot is overwritten with a signature over the
/// message and every other byte is left untouched. Fails if the key is not
/// one of the transaction's signers.
pub fn sign_transaction_slot(private_key: &[u8; 32], wire: &[u8]) -> Result<Vec<u8>, SolError> {
    let mut seed = *private_key;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    seed.zeroize();
    let our_pubkey = signing_key.verifying_key().to_bytes();

    let decoded = decode_transaction(wire)?;
    if decoded.signatures.is_empty() {
        return Err(SolError::TransactionBuildError(
            "transaction has zero signatures".into(),
        ));
    }

    let slot = decoded
        .message
        .signer_keys()
        .iter()
        .position(|k| *k == our_pubkey)
        .ok_or_else(|| SolError::SigningError("pubkey not found in transaction signers".into()))?;

    let signature = signing_key.sign(&decoded.message_bytes);

    // Signature slots start right after the compact-u16 signature count.
    let (_, prefix_len) = decode_compact_u16(wire)?;
    let offset = prefix_len + slot * SIGNATURE_LEN;
    let mut signed = wire.to_vec();
    signed[offset..offset + SIGNATURE_LEN].copy_from_slice(&signature.to_bytes());

    Ok(signed)
}

/// Verify that every required signature slot holds a valid signature.
pub fn verify_transaction_signatures(wire: &[u8]) -> Result<(), SolError> {
    let decoded = decode_transaction(wire)?;

    for (slot, (sig, key)) in decoded
        .signatures
        .iter()
        .zip(decoded.message.signer_keys())
        .enumerate()
    {
        if *sig == EMPTY_SIGNATURE {
            return Err(SolError::SigningError(format!(
                "signature slot {slot} is empty"
            )));
        }
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(key)
            .map_err(|e| SolError::SigningError(format!("signer {slot} is not a valid key: {e}")))?;
        verifying_key
            .verify(&decoded.message_bytes, &ed25519_dalek::Signature::from_bytes(sig))
            .map_err(|_| SolError::SigningError(format!("signature slot {slot} does not verify")))?;
    }

    Ok(())
}

/// The transaction id: its first (fee payer) signature.
pub fn transaction_id(wire: &[u8]) -> Result<[u8; 64], SolError> {
    decode_transaction(wire)?
        .signatures
        .first()
        .copied()
        .ok_or_else(|| SolError::SerializationError("transaction has no signatures".into()))
}
