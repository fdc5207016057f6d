//! SPL Token and Associated Token Account helpers.
//!
//! Implements ATA address derivation, the idempotent ATA creation
//! instruction and the fixed binary layouts of token and mint accounts
//! without pulling in the `spl-token` or `spl-associated-token-account`
//! crates.

use crate::address::Pubkey;
use crate::error::SolError;
use crate::pda::find_program_address;
use crate::transaction::{SolAccountMeta, SolInstruction, SYSTEM_PROGRAM_ID};

// ---------------------------------------------------------------------------
// Well-known program IDs
// ---------------------------------------------------------------------------

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79, 0xac,
    0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff, 0x00, 0xa9,
]);

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d, 0x83,
    0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9, 0xf8, 0x59,
]);

/// Size of an SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = 165;

/// Size of an SPL mint account.
pub const MINT_LEN: usize = 82;

/// Associated Token Account program instruction tag for `CreateIdempotent`.
const ATA_CREATE_IDEMPOTENT: u8 = 1;

/// SPL Token program error code for an overdrawn source account.
pub const TOKEN_ERROR_INSUFFICIENT_FUNDS: u32 = 1;

// ---------------------------------------------------------------------------
// Associated Token Account derivation
// ---------------------------------------------------------------------------

/// Derive the associated token account address for an owner + mint pair.
///
/// The ATA is a PDA with seeds `[owner, token_program_id, mint]` derived
/// from the Associated Token Account program.
pub fn get_associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, SolError> {
    find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Like [`get_associated_token_address`], but refuses an off-curve owner
/// unless `allow_owner_off_curve` is set.
///
/// Program-derived owners (vault authorities) are legitimate but must be
/// opted into; an accidental PDA owner usually means the wrong key was passed.
pub fn get_associated_token_address_checked(
    owner: &Pubkey,
    mint: &Pubkey,
    allow_owner_off_curve: bool,
) -> Result<Pubkey, SolError> {
    if !allow_owner_off_curve && !owner.is_on_curve() {
        return Err(SolError::InvalidAddress(format!(
            "token owner {owner} is off-curve"
        )));
    }
    get_associated_token_address(owner, mint)
}

/// Build an ATA program `CreateIdempotent` instruction.
///
/// Succeeds on-chain whether or not the account already exists, so racing
/// resolvers cannot fail each other.
///
/// Accounts: payer (signer, writable), ata (writable), owner, mint,
/// system program, token program.
pub fn build_create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<SolInstruction, SolError> {
    let ata = get_associated_token_address(owner, mint)?;

    Ok(SolInstruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::new(*payer, true, true),
            SolAccountMeta::new(ata, false, true),
            SolAccountMeta::new_readonly(*owner),
            SolAccountMeta::new_readonly(*mint),
            SolAccountMeta::new_readonly(SYSTEM_PROGRAM_ID),
            SolAccountMeta::new_readonly(TOKEN_PROGRAM_ID),
        ],
        data: vec![ATA_CREATE_IDEMPOTENT],
    })
}

// ---------------------------------------------------------------------------
// Account layouts
// ---------------------------------------------------------------------------

/// Token account state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAccountState {
    Uninitialized,
    Initialized,
    Frozen,
}

/// The fields of an SPL token account this client relies on.
///
/// Layout (165 bytes):
///
/// ```text
///   0  mint               32
///  32  owner              32
///  64  amount             u64 LE
///  72  delegate           COption<Pubkey>  (4 + 32)
/// 108  state              u8
/// 109  is_native          COption<u64>     (4 + 8)
/// 121  delegated_amount   u64 LE
/// 129  close_authority    COption<Pubkey>  (4 + 32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub state: TokenAccountState,
}

impl TokenAccount {
    pub fn new(mint: Pubkey, owner: Pubkey, amount: u64) -> Self {
        Self {
            mint,
            owner,
            amount,
            state: TokenAccountState::Initialized,
        }
    }

    pub fn unpack(data: &[u8]) -> Result<Self, SolError> {
        if data.len() != TOKEN_ACCOUNT_LEN {
            return Err(SolError::InvalidAccountData(format!(
                "expected {TOKEN_ACCOUNT_LEN} token account bytes, got {}",
                data.len()
            )));
        }

        let state = match data[108] {
            0 => TokenAccountState::Uninitialized,
            1 => TokenAccountState::Initialized,
            2 => TokenAccountState::Frozen,
            other => {
                return Err(SolError::InvalidAccountData(format!(
                    "unknown token account state {other}"
                )))
            }
        };

        Ok(Self {
            mint: Pubkey::try_from_slice(&data[0..32])?,
            owner: Pubkey::try_from_slice(&data[32..64])?,
            amount: read_u64(&data[64..72]),
            state,
        })
    }

    /// Serialize into the 165-byte layout with no delegate, not native and
    /// no close authority.
    pub fn pack(&self) -> Vec<u8> {
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
        data[0..32].copy_from_slice(self.mint.as_ref());
        data[32..64].copy_from_slice(self.owner.as_ref());
        data[64..72].copy_from_slice(&self.amount.to_le_bytes());
        data[108] = match self.state {
            TokenAccountState::Uninitialized => 0,
            TokenAccountState::Initialized => 1,
            TokenAccountState::Frozen => 2,
        };
        data
    }
}

/// The fields of an SPL mint account this client relies on.
///
/// Layout (82 bytes): mint_authority COption<Pubkey> (36), supply u64 (8),
/// decimals u8 (1), is_initialized bool (1), freeze_authority
/// COption<Pubkey> (36).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mint {
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
}

impl Mint {
    pub fn unpack(data: &[u8]) -> Result<Self, SolError> {
        if data.len() != MINT_LEN {
            return Err(SolError::InvalidAccountData(format!(
                "expected {MINT_LEN} mint bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            supply: read_u64(&data[36..44]),
            decimals: data[44],
            is_initialized: data[45] != 0,
        })
    }

    /// Serialize with no mint or freeze authority.
    pub fn pack(&self) -> Vec<u8> {
        let mut data = vec![0u8; MINT_LEN];
        data[36..44].copy_from_slice(&self.supply.to_le_bytes());
        data[44] = self.decimals;
        data[45] = self.is_initialized as u8;
        data
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
