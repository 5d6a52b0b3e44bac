//! Pure constructors for the instructions each user action needs.
//!
//! Nothing here touches the network. Addresses must already be resolved and
//! amounts already scaled to raw base units.

use chain_sol::{SolInstruction, MINT_SIZE, TOKEN_PROGRAM_ID};

use crate::amount::ui_to_raw;
use crate::error::TokenError;
use crate::types::{Address, TokenHandle, MINT_AMOUNT_UI, TOKEN_DECIMALS};

/// Allocation of a new mint account plus its initialisation.
///
/// The two instructions only make sense together and in this order, so they
/// are carried as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMintInstruction {
    pub mint: Address,
    pub create_account: SolInstruction,
    pub initialize_mint: SolInstruction,
}

impl CreateMintInstruction {
    pub fn into_instructions(self) -> Vec<SolInstruction> {
        vec![self.create_account, self.initialize_mint]
    }
}

/// Build the instructions that create and initialise a mint.
///
/// `payer` funds `rent_lamports` into the new `mint` account; `authority`
/// becomes both mint and freeze authority.
pub fn build_create_mint(
    payer: &Address,
    mint: &Address,
    authority: &Address,
    decimals: u8,
    rent_lamports: u64,
) -> Result<CreateMintInstruction, TokenError> {
    let create_account = chain_sol::build_create_account(
        payer.as_bytes(),
        mint.as_bytes(),
        rent_lamports,
        MINT_SIZE as u64,
        &TOKEN_PROGRAM_ID,
    )?;
    let initialize_mint = chain_sol::build_initialize_mint2(
        mint.as_bytes(),
        authority.as_bytes(),
        Some(authority.as_bytes()),
        decimals,
    );

    Ok(CreateMintInstruction {
        mint: *mint,
        create_account,
        initialize_mint,
    })
}

/// Mint `raw_amount` base units of `token` into `destination`.
pub fn build_mint_to(
    token: &TokenHandle,
    destination: &Address,
    authority: &Address,
    raw_amount: u64,
) -> Result<SolInstruction, TokenError> {
    Ok(chain_sol::build_mint_to(
        token.mint().as_bytes(),
        destination.as_bytes(),
        authority.as_bytes(),
        raw_amount,
    )?)
}

/// Move `raw_amount` base units between two token accounts of one mint.
pub fn build_transfer(
    source: &Address,
    destination: &Address,
    owner: &Address,
    raw_amount: u64,
) -> Result<SolInstruction, TokenError> {
    Ok(chain_sol::build_spl_transfer(
        source.as_bytes(),
        destination.as_bytes(),
        owner.as_bytes(),
        raw_amount,
    )?)
}

/// Raw units minted per mint operation.
pub fn mint_amount_raw() -> u64 {
    ui_to_raw(MINT_AMOUNT_UI, TOKEN_DECIMALS).unwrap_or(u64::MAX)
}
