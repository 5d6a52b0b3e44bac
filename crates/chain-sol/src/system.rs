//! System Program instructions.
//!
//! Only `CreateAccount` is needed here: a new mint account is allocated by
//! the System Program and handed to the SPL Token program in the same
//! transaction.

use crate::error::SolError;
use crate::transaction::{SolAccountMeta, SolInstruction};

/// The Solana System Program public key: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];

/// System Program `CreateAccount` instruction index (little-endian u32).
const SYSTEM_CREATE_ACCOUNT_IX_INDEX: u32 = 0;

/// A decoded System Program instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemInstruction {
    CreateAccount {
        lamports: u64,
        space: u64,
        owner: [u8; 32],
    },
}

/// Build a System Program `CreateAccount` instruction.
///
/// Both `payer` and `new_account` must sign the transaction: the payer funds
/// the rent-exempt balance and the new account proves it is not yet in use.
///
/// # Wire format
///
/// u32 LE index (0) + u64 LE lamports + u64 LE space + 32-byte owner = 52 bytes.
pub fn build_create_account(
    payer: &[u8; 32],
    new_account: &[u8; 32],
    lamports: u64,
    space: u64,
    owner: &[u8; 32],
) -> Result<SolInstruction, SolError> {
    if payer == new_account {
        return Err(SolError::InvalidInstruction(
            "new account must differ from payer".into(),
        ));
    }

    let mut data = Vec::with_capacity(52);
    data.extend_from_slice(&SYSTEM_CREATE_ACCOUNT_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    data.extend_from_slice(&space.to_le_bytes());
    data.extend_from_slice(owner);

    Ok(SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::signer(*payer),
            SolAccountMeta::signer(*new_account),
        ],
        data,
    })
}

/// Decode System Program instruction data.
pub fn parse_system_instruction(data: &[u8]) -> Result<SystemInstruction, SolError> {
    let tag_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SolError::InvalidInstruction("system instruction too short".into()))?;

    match u32::from_le_bytes(tag_bytes) {
        SYSTEM_CREATE_ACCOUNT_IX_INDEX => {
            if data.len() != 52 {
                return Err(SolError::InvalidInstruction(format!(
                    "CreateAccount expects 52 bytes, got {}",
                    data.len()
                )));
            }
            let lamports = read_u64(&data[4..12]);
            let space = read_u64(&data[12..20]);
            let mut owner = [0u8; 32];
            owner.copy_from_slice(&data[20..52]);
            Ok(SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            })
        }
        other => Err(SolError::InvalidInstruction(format!(
            "unsupported system instruction {other}"
        ))),
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
