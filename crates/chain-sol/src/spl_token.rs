//! SPL Token and Associated Token Account instructions.
//!
//! Covers the three token-program instructions the token manager emits
//! (`InitializeMint2`, `MintTo`, `Transfer`), the idempotent associated
//! token account creation, and ATA address derivation, all without pulling
//! in the `spl-token` crates.

use sha2::{Digest, Sha256};

use crate::error::SolError;
use crate::system::SYSTEM_PROGRAM_ID;
use crate::transaction::{SolAccountMeta, SolInstruction};

// ---------------------------------------------------------------------------
// Well-known program IDs and layout sizes
// ---------------------------------------------------------------------------

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: [u8; 32] = [
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79,
    0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff,
    0x00, 0xa9,
];

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: [u8; 32] = [
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d,
    0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9,
    0xf8, 0x59,
];

/// Size in bytes of an SPL Token mint account.
pub const MINT_SIZE: usize = 82;

/// Size in bytes of an SPL Token account.
pub const TOKEN_ACCOUNT_SIZE: usize = 165;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

const IX_TRANSFER: u8 = 3;
const IX_MINT_TO: u8 = 7;
const IX_INITIALIZE_MINT2: u8 = 20;

/// Associated Token Account program `CreateIdempotent` instruction index.
pub const ATA_CREATE_IDEMPOTENT: u8 = 1;

/// A decoded SPL Token instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenInstruction {
    InitializeMint2 {
        decimals: u8,
        mint_authority: [u8; 32],
        freeze_authority: Option<[u8; 32]>,
    },
    MintTo {
        amount: u64,
    },
    Transfer {
        amount: u64,
    },
}

// ---------------------------------------------------------------------------
// Mint creation
// ---------------------------------------------------------------------------

/// Build an SPL Token `InitializeMint2` instruction.
///
/// The mint account must already be allocated (see
/// [`crate::system::build_create_account`]) with [`MINT_SIZE`] bytes and
/// owned by the token program. Unlike `InitializeMint`, this variant does
/// not need the rent sysvar account.
///
/// # Wire format
///
/// `[20, decimals, mint_authority(32), option_tag, freeze_authority(32)?]`,
/// 35 bytes without a freeze authority, 67 with one.
pub fn build_initialize_mint2(
    mint: &[u8; 32],
    mint_authority: &[u8; 32],
    freeze_authority: Option<&[u8; 32]>,
    decimals: u8,
) -> SolInstruction {
    let mut data = Vec::with_capacity(67);
    data.push(IX_INITIALIZE_MINT2);
    data.push(decimals);
    data.extend_from_slice(mint_authority);
    match freeze_authority {
        Some(authority) => {
            data.push(1);
            data.extend_from_slice(authority);
        }
        None => data.push(0),
    }

    SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![SolAccountMeta::writable(*mint)],
        data,
    }
}

// ---------------------------------------------------------------------------
// MintTo / Transfer
// ---------------------------------------------------------------------------

/// Build an SPL Token `MintTo` instruction.
///
/// `amount` is in base units (for a 9-decimal token, `1_000_000_000` mints
/// one whole token). Data: `[7]` + u64 LE amount.
pub fn build_mint_to(
    mint: &[u8; 32],
    destination: &[u8; 32],
    mint_authority: &[u8; 32],
    amount: u64,
) -> Result<SolInstruction, SolError> {
    if amount == 0 {
        return Err(SolError::TransactionBuildError(
            "mint amount must be > 0".into(),
        ));
    }

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*mint),
            SolAccountMeta::writable(*destination),
            SolAccountMeta::readonly_signer(*mint_authority),
        ],
        data: amount_data(IX_MINT_TO, amount),
    })
}

/// Build an SPL Token `Transfer` instruction.
///
/// Moves `amount` base units from `from_token_account` to
/// `to_token_account`; `owner` must sign. Data: `[3]` + u64 LE amount.
pub fn build_spl_transfer(
    from_token_account: &[u8; 32],
    to_token_account: &[u8; 32],
    owner: &[u8; 32],
    amount: u64,
) -> Result<SolInstruction, SolError> {
    if amount == 0 {
        return Err(SolError::TransactionBuildError(
            "SPL transfer amount must be > 0".into(),
        ));
    }

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*from_token_account),
            SolAccountMeta::writable(*to_token_account),
            SolAccountMeta::readonly_signer(*owner),
        ],
        data: amount_data(IX_TRANSFER, amount),
    })
}

fn amount_data(tag: u8, amount: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(9);
    data.push(tag);
    data.extend_from_slice(&amount.to_le_bytes());
    data
}

/// Decode SPL Token instruction data for the instructions built here.
pub fn parse_token_instruction(data: &[u8]) -> Result<TokenInstruction, SolError> {
    let (&tag, rest) = data
        .split_first()
        .ok_or_else(|| SolError::InvalidInstruction("empty token instruction".into()))?;

    match tag {
        IX_MINT_TO | IX_TRANSFER => {
            let bytes: [u8; 8] = rest.try_into().map_err(|_| {
                SolError::InvalidInstruction(format!(
                    "amount instruction expects 8 data bytes, got {}",
                    rest.len()
                ))
            })?;
            let amount = u64::from_le_bytes(bytes);
            Ok(if tag == IX_MINT_TO {
                TokenInstruction::MintTo { amount }
            } else {
                TokenInstruction::Transfer { amount }
            })
        }
        IX_INITIALIZE_MINT2 => {
            if rest.len() < 34 {
                return Err(SolError::InvalidInstruction(
                    "InitializeMint2 data too short".into(),
                ));
            }
            let decimals = rest[0];
            let mut mint_authority = [0u8; 32];
            mint_authority.copy_from_slice(&rest[1..33]);
            let freeze_authority = match (rest[33], rest.len()) {
                (0, 34) => None,
                (1, 66) => {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&rest[34..66]);
                    Some(key)
                }
                _ => {
                    return Err(SolError::InvalidInstruction(
                        "malformed freeze authority option".into(),
                    ))
                }
            };
            Ok(TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                freeze_authority,
            })
        }
        other => Err(SolError::InvalidInstruction(format!(
            "unsupported token instruction {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Associated token accounts
// ---------------------------------------------------------------------------

/// Build an Associated Token Account `CreateIdempotent` instruction.
///
/// Creates the ATA for `(owner, mint)` funded by `payer`, and succeeds
/// without changes when the account already exists. Returns the instruction
/// together with the derived ATA address.
pub fn build_create_associated_token_account_idempotent(
    payer: &[u8; 32],
    owner: &[u8; 32],
    mint: &[u8; 32],
) -> Result<(SolInstruction, [u8; 32]), SolError> {
    let ata = derive_associated_token_address(owner, mint)?;

    let ix = SolInstruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::signer(*payer),
            SolAccountMeta::writable(ata),
            SolAccountMeta::readonly(*owner),
            SolAccountMeta::readonly(*mint),
            SolAccountMeta::readonly(SYSTEM_PROGRAM_ID),
            SolAccountMeta::readonly(TOKEN_PROGRAM_ID),
        ],
        data: vec![ATA_CREATE_IDEMPOTENT],
    };

    Ok((ix, ata))
}

/// Derive the associated token account address for a wallet + mint pair.
///
/// The ATA is a Program Derived Address with seeds
/// `[wallet_address, token_program_id, mint_address]` under the Associated
/// Token Account program.
pub fn derive_associated_token_address(
    wallet: &[u8; 32],
    mint: &[u8; 32],
) -> Result<[u8; 32], SolError> {
    find_program_address(
        &[wallet.as_ref(), &TOKEN_PROGRAM_ID, mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Find a valid Program Derived Address for the given seeds and program.
///
/// Bump seeds are tried from 255 down to 0; the first hash that is NOT a
/// valid Ed25519 point wins.
fn find_program_address(
    seeds: &[&[u8]],
    program_id: &[u8; 32],
) -> Result<([u8; 32], u8), SolError> {
    (0u8..=255)
        .rev()
        .find_map(|bump| {
            try_create_program_address(seeds, &[bump], program_id).map(|address| (address, bump))
        })
        .ok_or_else(|| SolError::InvalidAddress("could not find valid PDA bump seed".into()))
}

fn try_create_program_address(
    seeds: &[&[u8]],
    bump_seed: &[u8],
    program_id: &[u8; 32],
) -> Option<[u8; 32]> {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(bump_seed);
    hasher.update(program_id);
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    // A valid PDA must NOT be on the Ed25519 curve.
    (!is_on_curve(&hash)).then_some(hash)
}

fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}
