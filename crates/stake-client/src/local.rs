//! In-process ledger.
//!
//! `LocalLedger` implements [`LedgerRpc`] by executing transactions itself:
//! it verifies signatures and blockhashes, runs the associated token account
//! program's `Create`/`CreateIdempotent` and the staking program's
//! `do_stake` with on-chain semantics, applies each transaction atomically,
//! and pushes the staking program's events to subscribers from a dispatcher
//! thread.
//!
//! [`Faults`] makes it misbehave the way real endpoints do: failed reads,
//! reads that lag behind the latest write, confirmations that never arrive,
//! and duplicated or missing events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use sha2::{Digest, Sha256};
use sol_primitives::{
    find_program_address, get_associated_token_address, Hash, Message, Mint, Pubkey, Signature,
    SolAccountMeta, TokenAccount, Transaction, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    TOKEN_ERROR_INSUFFICIENT_FUNDS, TOKEN_PROGRAM_ID,
};
use tracing::{debug, info};

use crate::error::StakeClientError;
use crate::program::{
    discriminator, StakeEvent, StakeProgramError, StakeRecord, DEFAULT_PROGRAM_ID,
    DISCRIMINATOR_LEN, STAKER_SEED, VAULT_SEED,
};
use crate::rpc::{
    AccountData, Commitment, InstructionError, LedgerRpc, NotificationSink, ProgramNotification,
    RpcError, SubscriptionId, TransactionError, TransactionStatus,
};

/// Rent-exempt balances for the account sizes this ledger creates.
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;
pub const MINT_RENT: u64 = 1_461_600;
pub const STAKE_RECORD_RENT: u64 = 1_447_680;

// Framework error codes raised before the staking program's own logic runs.
const ANCHOR_INSTRUCTION_MISSING: u32 = 100;
const ANCHOR_INSTRUCTION_FALLBACK_NOT_FOUND: u32 = 101;
const ANCHOR_INSTRUCTION_DID_NOT_DESERIALIZE: u32 = 102;
const ANCHOR_CONSTRAINT_MUT: u32 = 2000;
const ANCHOR_CONSTRAINT_SEEDS: u32 = 2006;
const ANCHOR_CONSTRAINT_ASSOCIATED: u32 = 2009;
const ANCHOR_CONSTRAINT_TOKEN_MINT: u32 = 2014;
const ANCHOR_CONSTRAINT_TOKEN_OWNER: u32 = 2015;
const ANCHOR_ACCOUNT_DID_NOT_DESERIALIZE: u32 = 3003;
const ANCHOR_ACCOUNT_NOT_ENOUGH_KEYS: u32 = 3005;
const ANCHOR_ACCOUNT_OWNED_BY_WRONG_PROGRAM: u32 = 3007;
const ANCHOR_INVALID_PROGRAM_ID: u32 = 3008;
const ANCHOR_ACCOUNT_NOT_SIGNER: u32 = 3010;
const ANCHOR_ACCOUNT_NOT_INITIALIZED: u32 = 3012;

const TOKEN_ERROR_OVERFLOW: u32 = 14;
const SYSTEM_ERROR_ACCOUNT_ALREADY_IN_USE: u32 = 0;

const ATA_CREATE: u8 = 0;
const ATA_CREATE_IDEMPOTENT: u8 = 1;

/// Misbehaviour to inject. All off by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Fail this many upcoming account reads with a transport error.
    pub failing_reads: u32,
    /// Serve this many upcoming reads of recently written accounts from
    /// the version before the last write.
    pub lagging_reads: u32,
    /// Land transactions but never report their status.
    pub drop_confirmations: bool,
    /// Highest commitment statuses report. `None` means finalized.
    pub max_commitment: Option<Commitment>,
    /// Deliver every notification twice.
    pub duplicate_events: bool,
    /// Never deliver notifications.
    pub suppress_events: bool,
    /// Let failing transactions land with an error status instead of being
    /// refused up front.
    pub skip_preflight: bool,
    /// Execute this many upcoming transactions but answer the send with a
    /// transport error, as if the reply was lost.
    pub lost_send_replies: u32,
}

struct LedgerState {
    accounts: HashMap<Pubkey, AccountData>,
    /// Version of each account before its most recent write.
    previous: HashMap<Pubkey, Option<AccountData>>,
    statuses: HashMap<Signature, TransactionStatus>,
    blockhashes: HashSet<Hash>,
    slot: u64,
    faults: Faults,
    ata_creations: usize,
    executed: usize,
}

struct Subscriber {
    id: SubscriptionId,
    program_id: Pubkey,
    sink: Arc<Mutex<NotificationSink>>,
}

enum Dispatch {
    Deliver(Pubkey, ProgramNotification),
    Flush(Sender<()>),
}

pub struct LocalLedger {
    stake_program: Pubkey,
    state: Mutex<LedgerState>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    queue: Mutex<Option<Sender<Dispatch>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalLedger {
    /// A ledger with `stake_program` deployed and nothing else.
    pub fn new(stake_program: Pubkey) -> Self {
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        let dispatcher = spawn_dispatcher(Arc::clone(&subscribers), rx);

        Self {
            stake_program,
            state: Mutex::new(LedgerState {
                accounts: HashMap::new(),
                previous: HashMap::new(),
                statuses: HashMap::new(),
                blockhashes: HashSet::new(),
                slot: 0,
                faults: Faults::default(),
                ata_creations: 0,
                executed: 0,
            }),
            subscribers,
            queue: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn stake_program(&self) -> Pubkey {
        self.stake_program
    }

    /// Change the injected faults.
    pub fn inject(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut lock(&self.state).faults);
    }

    pub fn faults(&self) -> Faults {
        lock(&self.state).faults.clone()
    }

    /// Create an initialized mint at `address` with no supply.
    pub fn create_mint(&self, address: Pubkey, decimals: u8) {
        let mint = Mint {
            supply: 0,
            decimals,
            is_initialized: true,
        };
        self.set_account(
            address,
            AccountData {
                owner: TOKEN_PROGRAM_ID,
                lamports: MINT_RENT,
                data: mint.pack(),
            },
        );
    }

    /// Credit `amount` of `mint` to `owner`'s associated token account,
    /// creating it if needed. Returns the token account address.
    pub fn mint_to(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
        amount: u64,
    ) -> Result<Pubkey, StakeClientError> {
        let address = get_associated_token_address(owner, mint)?;
        let mut state = lock(&self.state);

        let mint_account = state
            .accounts
            .get(mint)
            .filter(|account| account.owner == TOKEN_PROGRAM_ID)
            .ok_or_else(|| StakeClientError::InvalidAddress(format!("mint {mint} not found")))?;
        let mut mint_state = Mint::unpack(&mint_account.data)?;
        mint_state.supply = mint_state
            .supply
            .checked_add(amount)
            .ok_or_else(|| StakeClientError::InvalidAmount("mint supply overflow".into()))?;

        let mut token = match state.accounts.get(&address) {
            Some(account) => TokenAccount::unpack(&account.data)?,
            None => TokenAccount::new(*mint, *owner, 0),
        };
        token.amount = token
            .amount
            .checked_add(amount)
            .ok_or_else(|| StakeClientError::InvalidAmount("token balance overflow".into()))?;

        if let Some(account) = state.accounts.get_mut(mint) {
            account.data = mint_state.pack();
        }
        let old = state.accounts.insert(
            address,
            AccountData {
                owner: TOKEN_PROGRAM_ID,
                lamports: TOKEN_ACCOUNT_RENT,
                data: token.pack(),
            },
        );
        state.previous.insert(address, old);
        Ok(address)
    }

    pub fn set_account(&self, address: Pubkey, account: AccountData) {
        let mut state = lock(&self.state);
        let old = state.accounts.insert(address, account);
        state.previous.insert(address, old);
    }

    /// Current account contents, ignoring injected faults.
    pub fn account(&self, address: &Pubkey) -> Option<AccountData> {
        lock(&self.state).accounts.get(address).cloned()
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        self.account(address)
            .and_then(|account| TokenAccount::unpack(&account.data).ok())
            .map(|token| token.amount)
    }

    /// Associated token accounts actually created (not already existing).
    pub fn ata_creations(&self) -> usize {
        lock(&self.state).ata_creations
    }

    /// Transactions that executed successfully.
    pub fn executed_transactions(&self) -> usize {
        lock(&self.state).executed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Block until every notification queued so far has been delivered.
    pub fn flush_events(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.dispatch(Dispatch::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    fn dispatch(&self, message: Dispatch) -> bool {
        match lock(&self.queue).as_ref() {
            Some(queue) => queue.send(message).is_ok(),
            None => false,
        }
    }

    /// Run every instruction of `message` against `accounts`. Returns the
    /// number of token accounts created.
    fn execute(
        &self,
        message: &Message,
        accounts: &mut HashMap<Pubkey, AccountData>,
        events: &mut Vec<Vec<u8>>,
    ) -> Result<usize, TransactionError> {
        let mut created = 0;
        for (index, ix) in message.instructions.iter().enumerate() {
            let index = index as u8;
            let fail = |error| TransactionError::InstructionError { index, error };

            let program_id = *message
                .account_keys
                .get(ix.program_id_index as usize)
                .ok_or_else(|| fail(InstructionError::Other("ProgramIndexOutOfRange".into())))?;
            let metas = ix
                .account_indices
                .iter()
                .map(|&i| {
                    let i = i as usize;
                    message.account_keys.get(i).map(|key| {
                        SolAccountMeta::new(*key, message.is_signer(i), message.is_writable(i))
                    })
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| fail(InstructionError::Other("AccountIndexOutOfRange".into())))?;

            if program_id == ASSOCIATED_TOKEN_PROGRAM_ID {
                if create_associated_account(accounts, &metas, &ix.data).map_err(fail)? {
                    created += 1;
                }
            } else if program_id == self.stake_program {
                do_stake(&self.stake_program, accounts, &metas, &ix.data, events).map_err(fail)?;
            } else {
                return Err(fail(InstructionError::Other("UnsupportedProgramId".into())));
            }
        }
        Ok(created)
    }
}

impl Default for LocalLedger {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM_ID)
    }
}

impl Drop for LocalLedger {
    fn drop(&mut self) {
        lock(&self.queue).take();
        if let Some(handle) = lock(&self.dispatcher).take() {
            let _ = handle.join();
        }
    }
}

fn spawn_dispatcher(
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    queue: Receiver<Dispatch>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for message in queue {
            match message {
                Dispatch::Deliver(program_id, note) => {
                    // Sinks run outside the subscriber lock so they may
                    // unsubscribe without deadlocking.
                    let sinks: Vec<_> = lock(&subscribers)
                        .iter()
                        .filter(|s| s.program_id == program_id)
                        .map(|s| Arc::clone(&s.sink))
                        .collect();
                    for sink in sinks {
                        let mut deliver = lock(&sink);
                        (*deliver)(note.clone());
                    }
                }
                Dispatch::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    })
}

impl LedgerRpc for LocalLedger {
    fn get_account(&self, address: &Pubkey) -> Result<Option<AccountData>, RpcError> {
        let mut state = lock(&self.state);
        if state.faults.failing_reads > 0 {
            state.faults.failing_reads -= 1;
            return Err(RpcError::Transport("connection reset by peer".into()));
        }
        if state.faults.lagging_reads > 0 {
            if let Some(previous) = state.previous.get(address).cloned() {
                state.faults.lagging_reads -= 1;
                debug!(address = %address, "serving lagging read");
                return Ok(previous);
            }
        }
        Ok(state.accounts.get(address).cloned())
    }

    fn get_program_accounts(
        &self,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, AccountData)>, RpcError> {
        let state = lock(&self.state);
        let mut owned: Vec<_> = state
            .accounts
            .iter()
            .filter(|(_, account)| account.owner == *program_id)
            .map(|(key, account)| (*key, account.clone()))
            .collect();
        owned.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(owned)
    }

    fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        let mut state = lock(&self.state);
        let mut hasher = Sha256::new();
        hasher.update(b"blockhash");
        hasher.update(state.slot.to_le_bytes());
        hasher.update((state.blockhashes.len() as u64).to_le_bytes());
        let hash = Hash::new_from_array(hasher.finalize().into());
        state.blockhashes.insert(hash);
        Ok(hash)
    }

    fn send_transaction(&self, wire: &[u8]) -> Result<Signature, RpcError> {
        let tx = Transaction::from_wire(wire).map_err(|e| {
            RpcError::Rejected(TransactionError::Other(format!("malformed transaction: {e}")))
        })?;
        let signature = tx
            .id()
            .ok_or(RpcError::Rejected(TransactionError::SignatureFailure))?;
        if !tx.verify() {
            return Err(RpcError::Rejected(TransactionError::SignatureFailure));
        }

        let mut state = lock(&self.state);
        if !state.blockhashes.contains(&tx.message.recent_blockhash) {
            return Err(RpcError::Rejected(TransactionError::BlockhashNotFound));
        }
        if state.statuses.contains_key(&signature) {
            debug!(signature = %signature, "duplicate transaction ignored");
            return Ok(signature);
        }

        let mut working = state.accounts.clone();
        let mut events = Vec::new();
        let outcome = self.execute(&tx.message, &mut working, &mut events);
        let commitment = state.faults.max_commitment.unwrap_or(Commitment::Finalized);

        match outcome {
            Ok(created) => {
                state.slot += 1;
                let slot = state.slot;
                for (key, account) in working {
                    if state.accounts.get(&key) != Some(&account) {
                        let old = state.accounts.insert(key, account);
                        state.previous.insert(key, old);
                    }
                }
                state.ata_creations += created;
                state.executed += 1;
                state.statuses.insert(
                    signature,
                    TransactionStatus {
                        slot,
                        commitment,
                        err: None,
                    },
                );
                let copies = match (&state.faults, events.is_empty()) {
                    (_, true) => 0,
                    (faults, false) if faults.suppress_events => 0,
                    (faults, false) if faults.duplicate_events => 2,
                    _ => 1,
                };
                let reply_lost = state.faults.lost_send_replies > 0;
                if reply_lost {
                    state.faults.lost_send_replies -= 1;
                }
                drop(state);

                info!(signature = %signature, slot, "transaction executed");
                let note = ProgramNotification {
                    signature,
                    slot,
                    data: events,
                };
                for _ in 0..copies {
                    self.dispatch(Dispatch::Deliver(self.stake_program, note.clone()));
                }
                if reply_lost {
                    return Err(RpcError::Transport("connection reset before reply".into()));
                }
                Ok(signature)
            }
            Err(err) if state.faults.skip_preflight => {
                state.slot += 1;
                let slot = state.slot;
                info!(signature = %signature, slot, error = %err, "transaction failed");
                state.statuses.insert(
                    signature,
                    TransactionStatus {
                        slot,
                        commitment,
                        err: Some(err),
                    },
                );
                Ok(signature)
            }
            Err(err) => {
                debug!(signature = %signature, error = %err, "preflight rejected transaction");
                Err(RpcError::Rejected(err))
            }
        }
    }

    fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionStatus>, RpcError> {
        let state = lock(&self.state);
        if state.faults.drop_confirmations {
            return Ok(None);
        }
        Ok(state.statuses.get(signature).cloned())
    }

    fn subscribe_program(
        &self,
        program_id: &Pubkey,
        sink: NotificationSink,
    ) -> Result<SubscriptionId, RpcError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscribers).push(Subscriber {
            id,
            program_id: *program_id,
            sink: Arc::new(Mutex::new(sink)),
        });
        Ok(id)
    }

    fn unsubscribe_program(&self, id: SubscriptionId) -> Result<(), RpcError> {
        lock(&self.subscribers).retain(|s| s.id != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Program execution
// ---------------------------------------------------------------------------

fn other(name: &str) -> InstructionError {
    InstructionError::Other(name.to_string())
}

fn read_token_account(
    accounts: &HashMap<Pubkey, AccountData>,
    address: &Pubkey,
) -> Option<TokenAccount> {
    accounts
        .get(address)
        .filter(|account| account.owner == TOKEN_PROGRAM_ID)
        .and_then(|account| TokenAccount::unpack(&account.data).ok())
}

fn write_token_account(
    accounts: &mut HashMap<Pubkey, AccountData>,
    address: Pubkey,
    token: &TokenAccount,
) {
    let lamports = accounts
        .get(&address)
        .map_or(TOKEN_ACCOUNT_RENT, |account| account.lamports);
    accounts.insert(
        address,
        AccountData {
            owner: TOKEN_PROGRAM_ID,
            lamports,
            data: token.pack(),
        },
    );
}

/// Associated token account program. Returns whether an account was created.
fn create_associated_account(
    accounts: &mut HashMap<Pubkey, AccountData>,
    metas: &[SolAccountMeta],
    data: &[u8],
) -> Result<bool, InstructionError> {
    let [payer, ata, owner, mint, system, token_program, ..] = metas else {
        return Err(other("NotEnoughAccountKeys"));
    };
    let idempotent = match data {
        [] | [ATA_CREATE] => false,
        [ATA_CREATE_IDEMPOTENT] => true,
        _ => return Err(other("InvalidInstructionData")),
    };
    if !payer.is_signer {
        return Err(other("MissingRequiredSignature"));
    }
    if !payer.is_writable || !ata.is_writable {
        return Err(other("ReadonlyDataModified"));
    }
    if system.pubkey != SYSTEM_PROGRAM_ID || token_program.pubkey != TOKEN_PROGRAM_ID {
        return Err(other("IncorrectProgramId"));
    }
    let expected = get_associated_token_address(&owner.pubkey, &mint.pubkey)
        .map_err(|_| other("InvalidSeeds"))?;
    if expected != ata.pubkey {
        return Err(other("InvalidSeeds"));
    }
    let mint_ok = accounts
        .get(&mint.pubkey)
        .filter(|account| account.owner == TOKEN_PROGRAM_ID)
        .and_then(|account| Mint::unpack(&account.data).ok())
        .is_some_and(|state| state.is_initialized);
    if !mint_ok {
        return Err(other("InvalidAccountData"));
    }

    if accounts.contains_key(&ata.pubkey) {
        if !idempotent {
            return Err(InstructionError::Custom(SYSTEM_ERROR_ACCOUNT_ALREADY_IN_USE));
        }
        return match read_token_account(accounts, &ata.pubkey) {
            Some(existing) if existing.mint == mint.pubkey && existing.owner == owner.pubkey => {
                Ok(false)
            }
            _ => Err(other("IllegalOwner")),
        };
    }

    write_token_account(
        accounts,
        ata.pubkey,
        &TokenAccount::new(mint.pubkey, owner.pubkey, 0),
    );
    Ok(true)
}

/// Staking program `do_stake`.
fn do_stake(
    program_id: &Pubkey,
    accounts: &mut HashMap<Pubkey, AccountData>,
    metas: &[SolAccountMeta],
    data: &[u8],
    events: &mut Vec<Vec<u8>>,
) -> Result<(), InstructionError> {
    use InstructionError::Custom;

    if data.len() < DISCRIMINATOR_LEN {
        return Err(Custom(ANCHOR_INSTRUCTION_MISSING));
    }
    if data[..DISCRIMINATOR_LEN] != discriminator("global", "do_stake") {
        return Err(Custom(ANCHOR_INSTRUCTION_FALLBACK_NOT_FOUND));
    }
    let amount = data
        .get(DISCRIMINATOR_LEN..DISCRIMINATOR_LEN + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(Custom(ANCHOR_INSTRUCTION_DID_NOT_DESERIALIZE))?;

    let [user, mint, vault_authority, user_ata, vault_ata, staker, token_program, ata_program, system_program, ..] =
        metas
    else {
        return Err(Custom(ANCHOR_ACCOUNT_NOT_ENOUGH_KEYS));
    };

    if !user.is_signer {
        return Err(Custom(ANCHOR_ACCOUNT_NOT_SIGNER));
    }
    if !(user.is_writable && user_ata.is_writable && vault_ata.is_writable && staker.is_writable) {
        return Err(Custom(ANCHOR_CONSTRAINT_MUT));
    }
    if token_program.pubkey != TOKEN_PROGRAM_ID
        || ata_program.pubkey != ASSOCIATED_TOKEN_PROGRAM_ID
        || system_program.pubkey != SYSTEM_PROGRAM_ID
    {
        return Err(Custom(ANCHOR_INVALID_PROGRAM_ID));
    }

    let (expected_vault, _) = find_program_address(&[VAULT_SEED, mint.pubkey.as_ref()], program_id)
        .map_err(|_| Custom(ANCHOR_CONSTRAINT_SEEDS))?;
    if expected_vault != vault_authority.pubkey {
        return Err(Custom(ANCHOR_CONSTRAINT_SEEDS));
    }
    let (expected_staker, _) = find_program_address(
        &[STAKER_SEED, user.pubkey.as_ref(), mint.pubkey.as_ref()],
        program_id,
    )
    .map_err(|_| Custom(ANCHOR_CONSTRAINT_SEEDS))?;
    if expected_staker != staker.pubkey {
        return Err(Custom(ANCHOR_CONSTRAINT_SEEDS));
    }

    let mut from = checked_token_account(accounts, user_ata, &mint.pubkey, &user.pubkey)?;
    let mut to = checked_token_account(accounts, vault_ata, &mint.pubkey, &vault_authority.pubkey)?;

    let mut record = match accounts.get(&staker.pubkey) {
        Some(account) if account.owner != *program_id => {
            return Err(Custom(ANCHOR_ACCOUNT_OWNED_BY_WRONG_PROGRAM))
        }
        Some(account) => {
            StakeRecord::decode(&account.data).map_err(|_| Custom(ANCHOR_ACCOUNT_DID_NOT_DESERIALIZE))?
        }
        None => StakeRecord {
            owner: Pubkey::default(),
            mint: Pubkey::default(),
            total: 0,
        },
    };

    // Token transfer user -> vault.
    from.amount = from
        .amount
        .checked_sub(amount)
        .ok_or(Custom(TOKEN_ERROR_INSUFFICIENT_FUNDS))?;
    to.amount = to
        .amount
        .checked_add(amount)
        .ok_or(Custom(TOKEN_ERROR_OVERFLOW))?;

    if record.owner == Pubkey::default() {
        record.owner = user.pubkey;
        record.mint = mint.pubkey;
        record.total = 0;
    }
    if record.owner != user.pubkey {
        return Err(Custom(StakeProgramError::OwnerMismatch.code()));
    }
    if record.mint != mint.pubkey {
        return Err(Custom(StakeProgramError::MintMismatch.code()));
    }
    record.total = record
        .total
        .checked_add(amount)
        .ok_or(Custom(StakeProgramError::MathOverflow.code()))?;

    write_token_account(accounts, user_ata.pubkey, &from);
    write_token_account(accounts, vault_ata.pubkey, &to);
    let lamports = accounts
        .get(&staker.pubkey)
        .map_or(STAKE_RECORD_RENT, |account| account.lamports);
    accounts.insert(
        staker.pubkey,
        AccountData {
            owner: *program_id,
            lamports,
            data: record.encode(),
        },
    );

    events.push(
        StakeEvent {
            staker: record.owner,
            mint: record.mint,
            amount,
            new_total: record.total,
        }
        .encode(),
    );
    Ok(())
}

/// The `associated_token::mint/authority` constraint.
fn checked_token_account(
    accounts: &HashMap<Pubkey, AccountData>,
    meta: &SolAccountMeta,
    mint: &Pubkey,
    authority: &Pubkey,
) -> Result<TokenAccount, InstructionError> {
    let expected = get_associated_token_address(authority, mint)
        .map_err(|_| InstructionError::Custom(ANCHOR_CONSTRAINT_ASSOCIATED))?;
    if expected != meta.pubkey {
        return Err(InstructionError::Custom(ANCHOR_CONSTRAINT_ASSOCIATED));
    }
    let token = read_token_account(accounts, &meta.pubkey)
        .ok_or(InstructionError::Custom(ANCHOR_ACCOUNT_NOT_INITIALIZED))?;
    if token.mint != *mint {
        return Err(InstructionError::Custom(ANCHOR_CONSTRAINT_TOKEN_MINT));
    }
    if token.owner != *authority {
        return Err(InstructionError::Custom(ANCHOR_CONSTRAINT_TOKEN_OWNER));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::StakeProgram;
    use sol_primitives::{
        build_create_associated_token_account_idempotent, compile_message, Keypair, SolInstruction,
    };

    fn sign(ledger: &LocalLedger, payer: &Keypair, instructions: &[SolInstruction]) -> Vec<u8> {
        let blockhash = ledger.get_latest_blockhash().unwrap();
        let message = compile_message(instructions, &payer.pubkey(), &blockhash).unwrap();
        Transaction::new_signed(message, &[payer]).unwrap().to_wire()
    }

    fn setup(balance: u64) -> (LocalLedger, Keypair, Pubkey) {
        let ledger = LocalLedger::default();
        let payer = Keypair::from_seed(&[0x31; 32]);
        let mint = Keypair::from_seed(&[0x32; 32]).pubkey();
        ledger.create_mint(mint, 6);
        ledger.mint_to(&mint, &payer.pubkey(), balance).unwrap();
        (ledger, payer, mint)
    }

    fn stake_ixs(payer: &Keypair, mint: &Pubkey, amount: u64) -> Vec<SolInstruction> {
        let program = StakeProgram::default();
        let accounts = program.stake_accounts(&payer.pubkey(), mint).unwrap();
        vec![
            build_create_associated_token_account_idempotent(
                &payer.pubkey(),
                &accounts.vault_authority,
                mint,
            )
            .unwrap(),
            program.stake_instruction(&accounts, amount),
        ]
    }

    #[test]
    fn executes_stake_and_moves_tokens() {
        let (ledger, payer, mint) = setup(1_000);
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 400));
        let sig = ledger.send_transaction(&wire).unwrap();

        let status = ledger.get_signature_status(&sig).unwrap().unwrap();
        assert_eq!(status.err, None);
        assert_eq!(status.commitment, Commitment::Finalized);

        let accounts = StakeProgram::default()
            .stake_accounts(&payer.pubkey(), &mint)
            .unwrap();
        assert_eq!(ledger.token_balance(&accounts.user_token_account), Some(600));
        assert_eq!(ledger.token_balance(&accounts.vault_token_account), Some(400));
        let record = StakeRecord::decode(&ledger.account(&accounts.stake_record).unwrap().data).unwrap();
        assert_eq!(record.total, 400);
        assert_eq!(record.owner, payer.pubkey());
        assert_eq!(ledger.ata_creations(), 1);
    }

    #[test]
    fn failed_instruction_leaves_state_untouched() {
        let (ledger, payer, mint) = setup(100);
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 101));
        let err = ledger.send_transaction(&wire).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Rejected(TransactionError::InstructionError {
                index: 1,
                error: InstructionError::Custom(TOKEN_ERROR_INSUFFICIENT_FUNDS)
            })
        ));

        // The vault account creation in the same transaction was rolled back.
        let accounts = StakeProgram::default()
            .stake_accounts(&payer.pubkey(), &mint)
            .unwrap();
        assert!(ledger.account(&accounts.vault_token_account).is_none());
        assert_eq!(ledger.ata_creations(), 0);
        assert_eq!(ledger.executed_transactions(), 0);
    }

    #[test]
    fn skip_preflight_records_failure_status() {
        let (ledger, payer, mint) = setup(100);
        ledger.inject(|f| f.skip_preflight = true);
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 101));
        let sig = ledger.send_transaction(&wire).unwrap();
        let status = ledger.get_signature_status(&sig).unwrap().unwrap();
        assert!(status.err.is_some());
    }

    #[test]
    fn overflowing_total_is_math_overflow() {
        let (ledger, payer, mint) = setup(10);
        let accounts = StakeProgram::default()
            .stake_accounts(&payer.pubkey(), &mint)
            .unwrap();
        ledger.set_account(
            accounts.stake_record,
            AccountData {
                owner: DEFAULT_PROGRAM_ID,
                lamports: STAKE_RECORD_RENT,
                data: StakeRecord {
                    owner: payer.pubkey(),
                    mint,
                    total: u64::MAX - 5,
                }
                .encode(),
            },
        );
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 10));
        let err = ledger.send_transaction(&wire).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Rejected(TransactionError::InstructionError {
                error: InstructionError::Custom(6002),
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_blockhash_and_tampered_signature() {
        let (ledger, payer, mint) = setup(10);
        let blockhash = Hash::new_from_array([1; 32]);
        let message = compile_message(&stake_ixs(&payer, &mint, 1), &payer.pubkey(), &blockhash).unwrap();
        let wire = Transaction::new_signed(message, &[&payer]).unwrap().to_wire();
        assert!(matches!(
            ledger.send_transaction(&wire),
            Err(RpcError::Rejected(TransactionError::BlockhashNotFound))
        ));

        let mut wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 1));
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            ledger.send_transaction(&wire),
            Err(RpcError::Rejected(TransactionError::SignatureFailure))
        ));
    }

    #[test]
    fn resending_same_transaction_executes_once() {
        let (ledger, payer, mint) = setup(10);
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 1));
        let first = ledger.send_transaction(&wire).unwrap();
        let second = ledger.send_transaction(&wire).unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.executed_transactions(), 1);
    }

    #[test]
    fn read_faults() {
        let (ledger, payer, mint) = setup(10);
        let ata = get_associated_token_address(&payer.pubkey(), &mint).unwrap();

        ledger.inject(|f| f.failing_reads = 1);
        assert!(ledger.get_account(&ata).unwrap_err().is_transient());
        assert!(ledger.get_account(&ata).unwrap().is_some());

        // Before `mint_to` the account did not exist.
        ledger.inject(|f| f.lagging_reads = 1);
        assert!(ledger.get_account(&ata).unwrap().is_none());
        assert!(ledger.get_account(&ata).unwrap().is_some());
    }

    #[test]
    fn notifications_reach_subscribers_until_unsubscribed() {
        let (ledger, payer, mint) = setup(10);
        let (tx, rx) = mpsc::channel();
        let id = ledger
            .subscribe_program(
                &DEFAULT_PROGRAM_ID,
                Box::new(move |note| {
                    let _ = tx.send(note);
                }),
            )
            .unwrap();

        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 3));
        let sig = ledger.send_transaction(&wire).unwrap();
        ledger.flush_events();
        let note = rx.try_recv().unwrap();
        assert_eq!(note.signature, sig);
        assert_eq!(note.data.len(), 1);

        ledger.unsubscribe_program(id).unwrap();
        assert_eq!(ledger.subscriber_count(), 0);
        let wire = sign(&ledger, &payer, &stake_ixs(&payer, &mint, 3));
        ledger.send_transaction(&wire).unwrap();
        ledger.flush_events();
        assert!(rx.try_recv().is_err());
    }
}
