//! An in-process ledger.
//!
//! `MemoryLedger` accepts the same wire transactions a real node would. It
//! verifies every signature, checks the blockhash, charges fees and runs the
//! System, SPL Token and Associated Token Account instructions this crate
//! emits. A transaction either applies completely or not at all. Faults can
//! be switched on to exercise the workflow's failure paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chain_sol::{
    derive_associated_token_address, parse_system_instruction, parse_token_instruction,
    CompiledInstruction, SolTransaction, SystemInstruction, TokenInstruction,
    ASSOCIATED_TOKEN_PROGRAM_ID, MINT_SIZE, SYSTEM_PROGRAM_ID, TOKEN_ACCOUNT_SIZE,
    TOKEN_PROGRAM_ID,
};

use super::{ConfirmationOutcome, LedgerClient};
use crate::error::LedgerError;
use crate::types::{Address, Blockhash, Commitment, FreshnessToken, Signature};

/// Fee charged per required signature.
pub const FEE_PER_SIGNATURE: u64 = 5_000;

/// Blocks a blockhash stays usable after it is handed out.
const BLOCKHASH_VALIDITY: u64 = 150;

const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_YEARS: u64 = 2;
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Rent-exempt minimum for an account holding `data_len` bytes.
pub fn rent_exempt_minimum(data_len: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + data_len as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_YEARS
}

/// How many times each ledger method has been called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCalls {
    pub get_balance: usize,
    pub get_latest_blockhash: usize,
    pub is_blockhash_valid: usize,
    pub account_exists: usize,
    pub minimum_balance_for_rent_exemption: usize,
    pub get_token_account_balance: usize,
    pub send_transaction: usize,
    pub confirm_transaction: usize,
}

impl LedgerCalls {
    pub fn total(&self) -> usize {
        self.get_balance
            + self.get_latest_blockhash
            + self.is_blockhash_valid
            + self.account_exists
            + self.minimum_balance_for_rent_exemption
            + self.get_token_account_balance
            + self.send_transaction
            + self.confirm_transaction
    }
}

/// State of an initialised mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintState {
    pub supply: u64,
    pub decimals: u8,
    pub mint_authority: Option<Address>,
    pub freeze_authority: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TokenAccountState {
    mint: [u8; 32],
    owner: [u8; 32],
    amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AccountData {
    Empty,
    Uninitialized { space: u64 },
    Mint(MintState),
    Token(TokenAccountState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Account {
    lamports: u64,
    owner: [u8; 32],
    data: AccountData,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    unavailable: bool,
    reject_submissions: bool,
    fail_confirmations: bool,
    fail_balance_queries: bool,
    stale_blockhashes: bool,
}

#[derive(Debug)]
struct LedgerState {
    accounts: HashMap<[u8; 32], Account>,
    blockhashes: HashMap<[u8; 32], u64>,
    block_height: u64,
    statuses: HashMap<[u8; 64], Result<(), String>>,
    submitted: Vec<Signature>,
    calls: LedgerCalls,
    faults: Faults,
}

pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                accounts: HashMap::new(),
                blockhashes: HashMap::new(),
                block_height: 1_000,
                statuses: HashMap::new(),
                submitted: Vec::new(),
                calls: LedgerCalls::default(),
                faults: Faults::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Test helpers ────────────────────────────────────────────────

    /// Credit `lamports` to a system account, creating it if needed.
    pub fn airdrop(&self, address: &Address, lamports: u64) {
        let mut state = self.lock();
        let account = state
            .accounts
            .entry(address.to_bytes())
            .or_insert_with(|| Account {
                lamports: 0,
                owner: SYSTEM_PROGRAM_ID,
                data: AccountData::Empty,
            });
        account.lamports = account.lamports.saturating_add(lamports);
    }

    /// Native balance without counting a call.
    pub fn balance(&self, address: &Address) -> u64 {
        self.lock()
            .accounts
            .get(address.as_bytes())
            .map_or(0, |a| a.lamports)
    }

    pub fn has_account(&self, address: &Address) -> bool {
        self.lock().accounts.contains_key(address.as_bytes())
    }

    /// Raw balance of `owner`'s associated account for `mint`, zero when the
    /// account does not exist.
    pub fn token_balance(&self, owner: &Address, mint: &Address) -> u64 {
        let Ok(ata) = derive_associated_token_address(owner.as_bytes(), mint.as_bytes()) else {
            return 0;
        };
        match self.lock().accounts.get(&ata).map(|a| &a.data) {
            Some(AccountData::Token(token)) => token.amount,
            _ => 0,
        }
    }

    pub fn mint_state(&self, mint: &Address) -> Option<MintState> {
        match self.lock().accounts.get(mint.as_bytes()).map(|a| &a.data) {
            Some(AccountData::Mint(state)) => Some(*state),
            _ => None,
        }
    }

    pub fn calls(&self) -> LedgerCalls {
        self.lock().calls
    }

    /// Signatures of every transaction that was accepted, in order.
    pub fn submitted(&self) -> Vec<Signature> {
        self.lock().submitted.clone()
    }

    pub fn block_height(&self) -> u64 {
        self.lock().block_height
    }

    /// Advance the chain far enough that every blockhash handed out so far
    /// expires.
    pub fn expire_blockhashes(&self) {
        self.lock().block_height += BLOCKHASH_VALIDITY + 1;
    }

    /// Every call fails with a transport error.
    pub fn set_unavailable(&self, on: bool) {
        self.lock().faults.unavailable = on;
    }

    /// `send_transaction` rejects every transaction.
    pub fn set_reject_submissions(&self, on: bool) {
        self.lock().faults.reject_submissions = on;
    }

    /// `confirm_transaction` times out.
    pub fn set_fail_confirmations(&self, on: bool) {
        self.lock().faults.fail_confirmations = on;
    }

    /// `get_balance` times out.
    pub fn set_fail_balance_queries(&self, on: bool) {
        self.lock().faults.fail_balance_queries = on;
    }

    /// Blockhashes are already expired when handed out.
    pub fn set_stale_blockhashes(&self, on: bool) {
        self.lock().faults.stale_blockhashes = on;
    }
}

fn transport_down() -> LedgerError {
    LedgerError::Transport("connection refused".into())
}

impl LedgerState {
    fn check_available(&self) -> Result<(), LedgerError> {
        if self.faults.unavailable {
            Err(transport_down())
        } else {
            Ok(())
        }
    }

    fn blockhash_valid(&self, blockhash: &[u8; 32]) -> bool {
        self.blockhashes
            .get(blockhash)
            .is_some_and(|last_valid| self.block_height <= *last_valid)
    }

    fn process(&mut self, wire: &[u8]) -> Result<Signature, LedgerError> {
        let decoded = chain_sol::decode_transaction(wire)
            .map_err(|e| LedgerError::Rejected(format!("malformed transaction: {e}")))?;
        chain_sol::verify_transaction_signatures(wire)
            .map_err(|e| LedgerError::Rejected(format!("signature verification failed: {e}")))?;

        let id = chain_sol::transaction_id(wire)
            .map_err(|e| LedgerError::Rejected(format!("no transaction id: {e}")))?;
        if self.statuses.contains_key(&id) {
            return Err(LedgerError::Rejected("transaction already processed".into()));
        }
        if !self.blockhash_valid(&decoded.message.recent_blockhash) {
            return Err(LedgerError::Rejected("blockhash not found".into()));
        }

        let mut accounts = self.accounts.clone();
        charge_fee(&mut accounts, &decoded.message, decoded.signatures.len())?;

        for (position, ix) in decoded.message.compiled_instructions.iter().enumerate() {
            execute(&mut accounts, &decoded.message, ix).map_err(|reason| {
                LedgerError::Rejected(format!("instruction {position} failed: {reason}"))
            })?;
        }

        self.accounts = accounts;
        self.block_height += 1;
        self.statuses.insert(id, Ok(()));
        let signature = Signature::new(id);
        self.submitted.push(signature);
        Ok(signature)
    }
}

impl LedgerClient for MemoryLedger {
    async fn get_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        state.calls.get_balance += 1;
        state.check_available()?;
        if state.faults.fail_balance_queries {
            return Err(LedgerError::Timeout("getBalance".into()));
        }
        Ok(state
            .accounts
            .get(address.as_bytes())
            .map_or(0, |a| a.lamports))
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, LedgerError> {
        let mut state = self.lock();
        state.calls.get_latest_blockhash += 1;
        state.check_available()?;

        let blockhash: [u8; 32] = rand::random();
        let last_valid_block_height = if state.faults.stale_blockhashes {
            state.block_height - 1
        } else {
            state.block_height + BLOCKHASH_VALIDITY
        };
        state.blockhashes.insert(blockhash, last_valid_block_height);

        Ok(FreshnessToken {
            blockhash: Blockhash::new(blockhash),
            last_valid_block_height,
        })
    }

    async fn is_blockhash_valid(&self, token: &FreshnessToken) -> Result<bool, LedgerError> {
        let mut state = self.lock();
        state.calls.is_blockhash_valid += 1;
        state.check_available()?;
        Ok(state.blockhash_valid(token.blockhash.as_bytes()))
    }

    async fn account_exists(&self, address: &Address) -> Result<bool, LedgerError> {
        let mut state = self.lock();
        state.calls.account_exists += 1;
        state.check_available()?;
        Ok(state.accounts.contains_key(address.as_bytes()))
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        state.calls.minimum_balance_for_rent_exemption += 1;
        state.check_available()?;
        Ok(rent_exempt_minimum(data_len))
    }

    async fn get_token_account_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        state.calls.get_token_account_balance += 1;
        state.check_available()?;
        match state.accounts.get(address.as_bytes()).map(|a| &a.data) {
            Some(AccountData::Token(token)) => Ok(token.amount),
            _ => Err(LedgerError::Rpc {
                code: -32602,
                message: format!("could not find token account {address}"),
            }),
        }
    }

    async fn send_transaction(&self, wire: &[u8]) -> Result<Signature, LedgerError> {
        let mut state = self.lock();
        state.calls.send_transaction += 1;
        state.check_available()?;
        if state.faults.reject_submissions {
            return Err(LedgerError::Rejected("node is not accepting transactions".into()));
        }
        state.process(wire)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _commitment: Commitment,
    ) -> Result<ConfirmationOutcome, LedgerError> {
        let mut state = self.lock();
        state.calls.confirm_transaction += 1;
        state.check_available()?;
        if state.faults.fail_confirmations {
            return Err(LedgerError::Timeout(format!("{signature} was not confirmed")));
        }
        match state.statuses.get(signature.as_bytes()) {
            Some(Ok(())) => Ok(ConfirmationOutcome::Confirmed),
            Some(Err(reason)) => Ok(ConfirmationOutcome::Failed(reason.clone())),
            None => Err(LedgerError::Timeout(format!("{signature} is unknown"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Instruction execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct AccountRef {
    key: [u8; 32],
    signer: bool,
    writable: bool,
}

impl AccountRef {
    fn require_signer(&self, role: &str) -> Result<(), String> {
        if self.signer {
            Ok(())
        } else {
            Err(format!("{role} must sign"))
        }
    }

    fn require_writable(&self, role: &str) -> Result<(), String> {
        if self.writable {
            Ok(())
        } else {
            Err(format!("{role} must be writable"))
        }
    }
}

fn account_ref(
    message: &SolTransaction,
    ix: &CompiledInstruction,
    position: usize,
) -> Result<AccountRef, String> {
    let index = *ix
        .account_indices
        .get(position)
        .ok_or_else(|| format!("missing account {position}"))? as usize;
    let key = *message
        .account_keys
        .get(index)
        .ok_or_else(|| format!("account index {index} out of range"))?;
    Ok(AccountRef {
        key,
        signer: index < message.num_required_signatures as usize,
        writable: message.is_writable(index),
    })
}

fn charge_fee(
    accounts: &mut HashMap<[u8; 32], Account>,
    message: &SolTransaction,
    signatures: usize,
) -> Result<(), LedgerError> {
    let fee = FEE_PER_SIGNATURE * signatures as u64;
    let payer = message
        .fee_payer()
        .ok_or_else(|| LedgerError::Rejected("transaction has no fee payer".into()))?;
    let account = accounts
        .get_mut(payer)
        .filter(|a| a.lamports >= fee)
        .ok_or_else(|| LedgerError::Rejected("insufficient funds for fee".into()))?;
    account.lamports -= fee;
    Ok(())
}

fn execute(
    accounts: &mut HashMap<[u8; 32], Account>,
    message: &SolTransaction,
    ix: &CompiledInstruction,
) -> Result<(), String> {
    let program = message
        .account_keys
        .get(ix.program_id_index as usize)
        .ok_or("program index out of range")?;

    match *program {
        SYSTEM_PROGRAM_ID => execute_system(accounts, message, ix),
        TOKEN_PROGRAM_ID => execute_token(accounts, message, ix),
        ASSOCIATED_TOKEN_PROGRAM_ID => execute_associated(accounts, message, ix),
        other => Err(format!("unknown program {}", Address::new(other))),
    }
}

fn debit(
    accounts: &mut HashMap<[u8; 32], Account>,
    key: &[u8; 32],
    lamports: u64,
) -> Result<(), String> {
    let account = accounts.get_mut(key).ok_or("payer account not found")?;
    account.lamports = account
        .lamports
        .checked_sub(lamports)
        .ok_or("insufficient lamports")?;
    Ok(())
}

fn execute_system(
    accounts: &mut HashMap<[u8; 32], Account>,
    message: &SolTransaction,
    ix: &CompiledInstruction,
) -> Result<(), String> {
    let SystemInstruction::CreateAccount {
        lamports,
        space,
        owner,
    } = parse_system_instruction(&ix.data).map_err(|e| e.to_string())?;

    let payer = account_ref(message, ix, 0)?;
    let new_account = account_ref(message, ix, 1)?;
    payer.require_signer("payer")?;
    payer.require_writable("payer")?;
    new_account.require_signer("new account")?;
    new_account.require_writable("new account")?;

    if accounts
        .get(&new_account.key)
        .is_some_and(|a| a.lamports > 0 || a.data != AccountData::Empty)
    {
        return Err("account already in use".into());
    }

    debit(accounts, &payer.key, lamports)?;
    accounts.insert(
        new_account.key,
        Account {
            lamports,
            owner,
            data: AccountData::Uninitialized { space },
        },
    );
    Ok(())
}

fn execute_token(
    accounts: &mut HashMap<[u8; 32], Account>,
    message: &SolTransaction,
    ix: &CompiledInstruction,
) -> Result<(), String> {
    match parse_token_instruction(&ix.data).map_err(|e| e.to_string())? {
        TokenInstruction::InitializeMint2 {
            decimals,
            mint_authority,
            freeze_authority,
        } => {
            let mint = account_ref(message, ix, 0)?;
            mint.require_writable("mint")?;
            let account = accounts.get_mut(&mint.key).ok_or("mint account not found")?;
            if account.owner != TOKEN_PROGRAM_ID {
                return Err("mint account is not owned by the token program".into());
            }
            if account.data != (AccountData::Uninitialized { space: MINT_SIZE as u64 }) {
                return Err("mint account is already initialized or has the wrong size".into());
            }
            if account.lamports < rent_exempt_minimum(MINT_SIZE) {
                return Err("mint account is not rent exempt".into());
            }
            account.data = AccountData::Mint(MintState {
                supply: 0,
                decimals,
                mint_authority: Some(Address::new(mint_authority)),
                freeze_authority: freeze_authority.map(Address::new),
            });
            Ok(())
        }
        TokenInstruction::MintTo { amount } => {
            let mint = account_ref(message, ix, 0)?;
            let destination = account_ref(message, ix, 1)?;
            let authority = account_ref(message, ix, 2)?;
            mint.require_writable("mint")?;
            destination.require_writable("destination")?;
            authority.require_signer("mint authority")?;

            let mut mint_state = match accounts.get(&mint.key).map(|a| &a.data) {
                Some(AccountData::Mint(state)) => *state,
                _ => return Err("mint not initialized".into()),
            };
            if mint_state.mint_authority != Some(Address::new(authority.key)) {
                return Err("wrong mint authority".into());
            }
            let mut token = token_account(accounts, &destination.key)?;
            if token.mint != mint.key {
                return Err("destination belongs to a different mint".into());
            }

            mint_state.supply = mint_state.supply.checked_add(amount).ok_or("supply overflow")?;
            token.amount = token.amount.checked_add(amount).ok_or("balance overflow")?;
            set_data(accounts, &mint.key, AccountData::Mint(mint_state));
            set_data(accounts, &destination.key, AccountData::Token(token));
            Ok(())
        }
        TokenInstruction::Transfer { amount } => {
            let source = account_ref(message, ix, 0)?;
            let destination = account_ref(message, ix, 1)?;
            let owner = account_ref(message, ix, 2)?;
            source.require_writable("source")?;
            destination.require_writable("destination")?;
            owner.require_signer("owner")?;

            let mut from = token_account(accounts, &source.key)?;
            if from.owner != owner.key {
                return Err("owner does not match source account".into());
            }
            if from.amount < amount {
                return Err("insufficient funds".into());
            }
            let to = token_account(accounts, &destination.key)?;
            if to.mint != from.mint {
                return Err("accounts belong to different mints".into());
            }
            if source.key == destination.key {
                return Ok(());
            }

            let mut to = to;
            from.amount -= amount;
            to.amount = to.amount.checked_add(amount).ok_or("balance overflow")?;
            set_data(accounts, &source.key, AccountData::Token(from));
            set_data(accounts, &destination.key, AccountData::Token(to));
            Ok(())
        }
    }
}

fn execute_associated(
    accounts: &mut HashMap<[u8; 32], Account>,
    message: &SolTransaction,
    ix: &CompiledInstruction,
) -> Result<(), String> {
    let idempotent = match ix.data.as_slice() {
        [] | [0] => false,
        [chain_sol::ATA_CREATE_IDEMPOTENT] => true,
        _ => return Err("unsupported associated token instruction".into()),
    };

    let payer = account_ref(message, ix, 0)?;
    let ata = account_ref(message, ix, 1)?;
    let owner = account_ref(message, ix, 2)?;
    let mint = account_ref(message, ix, 3)?;
    payer.require_signer("payer")?;
    payer.require_writable("payer")?;
    ata.require_writable("associated account")?;

    let expected =
        derive_associated_token_address(&owner.key, &mint.key).map_err(|e| e.to_string())?;
    if expected != ata.key {
        return Err("associated account address does not match owner and mint".into());
    }
    if !matches!(
        accounts.get(&mint.key).map(|a| &a.data),
        Some(AccountData::Mint(_))
    ) {
        return Err("mint not initialized".into());
    }

    if let Some(existing) = accounts.get(&ata.key) {
        return match (&existing.data, idempotent) {
            (AccountData::Token(token), true)
                if token.owner == owner.key && token.mint == mint.key =>
            {
                Ok(())
            }
            (_, true) => Err("account exists with unexpected state".into()),
            (_, false) => Err("account already in use".into()),
        };
    }

    let rent = rent_exempt_minimum(TOKEN_ACCOUNT_SIZE);
    debit(accounts, &payer.key, rent)?;
    accounts.insert(
        ata.key,
        Account {
            lamports: rent,
            owner: TOKEN_PROGRAM_ID,
            data: AccountData::Token(TokenAccountState {
                mint: mint.key,
                owner: owner.key,
                amount: 0,
            }),
        },
    );
    Ok(())
}

fn token_account(
    accounts: &HashMap<[u8; 32], Account>,
    key: &[u8; 32],
) -> Result<TokenAccountState, String> {
    match accounts.get(key).map(|a| &a.data) {
        Some(AccountData::Token(token)) => Ok(*token),
        _ => Err("token account not found".into()),
    }
}

fn set_data(accounts: &mut HashMap<[u8; 32], Account>, key: &[u8; 32], data: AccountData) {
    if let Some(account) = accounts.get_mut(key) {
        account.data = data;
    }
}
