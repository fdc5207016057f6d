//! Binary interface of the deployed staking program.
//!
//! The program is an Anchor program, so every instruction, account and
//! event payload starts with an 8-byte discriminator: the first 8 bytes of
//! `SHA-256("<namespace>:<Name>")`. Payloads are Borsh-encoded.
//!
//! `do_stake` accounts (order is part of the ABI):
//!
//! ```text
//! 0. [writable, signer] user
//! 1. []                 mint
//! 2. []                 vault authority   PDA ["vault", mint]
//! 3. [writable]         user token account   ATA(user, mint)
//! 4. [writable]         vault token account  ATA(vault authority, mint)
//! 5. [writable]         stake record      PDA ["staker", user, mint]
//! 6. []                 token program
//! 7. []                 associated token program
//! 8. []                 system program
//! ```

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use sol_primitives::{
    find_program_address, get_associated_token_address_checked, Pubkey, SolAccountMeta,
    SolInstruction, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use tracing::debug;

use crate::error::StakeClientError;

/// Program id the staking program was deployed under.
pub const DEFAULT_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0xd0, 0x17, 0x27, 0x39, 0xd3, 0xd3, 0x82, 0xba, 0xdf, 0xe7, 0x32, 0xb2, 0x33, 0xb4, 0x33, 0x62,
    0x92, 0x05, 0xf8, 0x25, 0xd9, 0x8f, 0x14, 0x55, 0x6f, 0x6e, 0x14, 0x08, 0xa5, 0xea, 0x6e, 0x71,
]);

/// Base58 form of the deployed program id.
pub const DEFAULT_PROGRAM_ID_STR: &str = "F1JH85HfWhojoEyTPq5jJHqjoEt1hPaSR9QthvCvLs9r";

pub const VAULT_SEED: &[u8] = b"vault";
pub const STAKER_SEED: &[u8] = b"staker";

/// Size of a stake record: discriminator + owner + mint + total.
pub const STAKE_RECORD_LEN: usize = 8 + 32 + 32 + 8;

/// Length of an Anchor discriminator.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Anchor discriminator for `namespace:name`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Split a discriminator-prefixed payload, checking the prefix.
pub(crate) fn strip_discriminator<'a>(
    data: &'a [u8],
    expected: &[u8; DISCRIMINATOR_LEN],
    what: &str,
) -> Result<&'a [u8], StakeClientError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(StakeClientError::AccountDecode(format!(
            "{what}: {} bytes is shorter than a discriminator",
            data.len()
        )));
    }
    let (prefix, body) = data.split_at(DISCRIMINATOR_LEN);
    if prefix != expected {
        return Err(StakeClientError::AccountDecode(format!(
            "{what}: discriminator {} does not match {}",
            hex::encode(prefix),
            hex::encode(expected)
        )));
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Program errors
// ---------------------------------------------------------------------------

/// Error codes the staking program raises. Anchor offsets user errors by 6000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeProgramError {
    OwnerMismatch,
    MintMismatch,
    MathOverflow,
}

impl StakeProgramError {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            6000 => Some(Self::OwnerMismatch),
            6001 => Some(Self::MintMismatch),
            6002 => Some(Self::MathOverflow),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::OwnerMismatch => 6000,
            Self::MintMismatch => 6001,
            Self::MathOverflow => 6002,
        }
    }
}

impl fmt::Display for StakeProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OwnerMismatch => "Owner does not match staker record",
            Self::MintMismatch => "Mint does not match staker record",
            Self::MathOverflow => "Arithmetic overflow",
        })
    }
}

// ---------------------------------------------------------------------------
// Accounts and events
// ---------------------------------------------------------------------------

/// On-chain stake record, one per (owner, mint).
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StakeRecord {
    pub owner: Pubkey,
    pub mint: Pubkey,
    /// Cumulative staked amount in base units.
    pub total: u64,
}

impl StakeRecord {
    pub const ACCOUNT_NAME: &'static str = "Staker";

    pub fn account_discriminator() -> [u8; DISCRIMINATOR_LEN] {
        discriminator("account", Self::ACCOUNT_NAME)
    }

    pub fn decode(data: &[u8]) -> Result<Self, StakeClientError> {
        let body = strip_discriminator(data, &Self::account_discriminator(), "stake record")?;
        // Anchor accounts may carry trailing space; only the prefix matters.
        let mut reader = body;
        Self::deserialize(&mut reader)
            .map_err(|e| StakeClientError::AccountDecode(format!("stake record: {e}")))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(STAKE_RECORD_LEN);
        data.extend_from_slice(&Self::account_discriminator());
        data.extend_from_slice(self.owner.as_ref());
        data.extend_from_slice(self.mint.as_ref());
        data.extend_from_slice(&self.total.to_le_bytes());
        data
    }
}

/// Emitted once per successful `do_stake`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StakeEvent {
    pub staker: Pubkey,
    pub mint: Pubkey,
    /// Amount staked by this call.
    pub amount: u64,
    /// Record total after this call.
    pub new_total: u64,
}

impl StakeEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut data = discriminator("event", "StakeEvent").to_vec();
        data.extend_from_slice(self.staker.as_ref());
        data.extend_from_slice(self.mint.as_ref());
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.extend_from_slice(&self.new_total.to_le_bytes());
        data
    }
}

// ---------------------------------------------------------------------------
// Address derivation and instruction building
// ---------------------------------------------------------------------------

/// Every account role `do_stake` expects, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeAccounts {
    pub user: Pubkey,
    pub mint: Pubkey,
    pub vault_authority: Pubkey,
    pub user_token_account: Pubkey,
    pub vault_token_account: Pubkey,
    pub stake_record: Pubkey,
}

impl StakeAccounts {
    /// Account metas in ABI order.
    pub fn to_account_metas(&self) -> Vec<SolAccountMeta> {
        vec![
            SolAccountMeta::new(self.user, true, true),
            SolAccountMeta::new_readonly(self.mint),
            SolAccountMeta::new_readonly(self.vault_authority),
            SolAccountMeta::new(self.user_token_account, false, true),
            SolAccountMeta::new(self.vault_token_account, false, true),
            SolAccountMeta::new(self.stake_record, false, true),
            SolAccountMeta::new_readonly(TOKEN_PROGRAM_ID),
            SolAccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID),
            SolAccountMeta::new_readonly(SYSTEM_PROGRAM_ID),
        ]
    }
}

/// Address book for one deployment of the staking program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeProgram {
    pub program_id: Pubkey,
}

impl StakeProgram {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    /// PDA that owns the vault token account: `["vault", mint]`.
    pub fn vault_authority(&self, mint: &Pubkey) -> Result<(Pubkey, u8), StakeClientError> {
        let derived = find_program_address(&[VAULT_SEED, mint.as_ref()], &self.program_id)?;
        debug!(mint = %mint, vault_authority = %derived.0, bump = derived.1, "derived vault authority");
        Ok(derived)
    }

    /// PDA of the stake record: `["staker", owner, mint]`.
    pub fn stake_record_address(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<(Pubkey, u8), StakeClientError> {
        let derived = find_program_address(
            &[STAKER_SEED, owner.as_ref(), mint.as_ref()],
            &self.program_id,
        )?;
        debug!(owner = %owner, mint = %mint, stake_record = %derived.0, bump = derived.1, "derived stake record");
        Ok(derived)
    }

    /// Derive every account role for `user` staking `mint`.
    pub fn stake_accounts(
        &self,
        user: &Pubkey,
        mint: &Pubkey,
    ) -> Result<StakeAccounts, StakeClientError> {
        let (vault_authority, _) = self.vault_authority(mint)?;
        let (stake_record, _) = self.stake_record_address(user, mint)?;
        Ok(StakeAccounts {
            user: *user,
            mint: *mint,
            vault_authority,
            user_token_account: get_associated_token_address_checked(user, mint, false)?,
            vault_token_account: get_associated_token_address_checked(
                &vault_authority,
                mint,
                true,
            )?,
            stake_record,
        })
    }

    /// Build `do_stake(amount)`.
    pub fn stake_instruction(&self, accounts: &StakeAccounts, amount: u64) -> SolInstruction {
        let mut data = discriminator("global", "do_stake").to_vec();
        data.extend_from_slice(&amount.to_le_bytes());

        SolInstruction {
            program_id: self.program_id,
            accounts: accounts.to_account_metas(),
            data,
        }
    }
}

impl Default for StakeProgram {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sol_primitives::{get_associated_token_address, Keypair};

    fn user() -> Pubkey {
        Keypair::from_seed(&[0x21u8; 32]).pubkey()
    }

    fn mint() -> Pubkey {
        Pubkey::new_from_array([0x4Du8; 32])
    }

    #[test]
    fn default_program_id_matches_deployment() {
        assert_eq!(DEFAULT_PROGRAM_ID.to_string(), DEFAULT_PROGRAM_ID_STR);
    }

    #[test]
    fn discriminators_are_namespaced() {
        assert_ne!(
            discriminator("account", "Staker"),
            discriminator("event", "Staker")
        );
        assert_eq!(
            discriminator("global", "do_stake"),
            [177, 172, 196, 162, 126, 112, 229, 80]
        );
        assert_eq!(
            StakeRecord::account_discriminator(),
            [171, 229, 193, 85, 67, 177, 151, 4]
        );
        assert_eq!(
            discriminator("event", "StakeEvent"),
            [226, 134, 188, 173, 19, 33, 75, 175]
        );
    }

    #[test]
    fn stake_record_layout() {
        let record = StakeRecord {
            owner: user(),
            mint: mint(),
            total: 1_230_000,
        };
        let data = record.encode();
        assert_eq!(data.len(), STAKE_RECORD_LEN);
        assert_eq!(&data[..8], &StakeRecord::account_discriminator());
        assert_eq!(&data[8..40], user().as_ref());
        assert_eq!(&data[72..80], &1_230_000u64.to_le_bytes());
        assert_eq!(StakeRecord::decode(&data).unwrap(), record);
    }

    #[test]
    fn stake_record_rejects_foreign_discriminator() {
        let mut data = StakeRecord {
            owner: user(),
            mint: mint(),
            total: 1,
        }
        .encode();
        data[0] ^= 0xFF;
        let err = StakeRecord::decode(&data).unwrap_err();
        assert!(err.to_string().contains("discriminator"));
    }

    #[test]
    fn stake_record_rejects_truncated_body() {
        let data = StakeRecord {
            owner: user(),
            mint: mint(),
            total: 1,
        }
        .encode();
        assert!(StakeRecord::decode(&data[..40]).is_err());
        assert!(StakeRecord::decode(&data[..4]).is_err());
    }

    #[test]
    fn stake_event_borsh_matches_encode() {
        let event = StakeEvent {
            staker: user(),
            mint: mint(),
            amount: 500,
            new_total: 1200,
        };
        let data = event.encode();
        assert_eq!(&data[..8], &discriminator("event", "StakeEvent"));
        assert_eq!(&data[8..], borsh::to_vec(&event).unwrap().as_slice());
    }

    #[test]
    fn derived_accounts_follow_seed_scheme() {
        let program = StakeProgram::default();
        let accounts = program.stake_accounts(&user(), &mint()).unwrap();

        let (vault, _) =
            find_program_address(&[b"vault", mint().as_ref()], &DEFAULT_PROGRAM_ID).unwrap();
        let (record, _) = find_program_address(
            &[b"staker", user().as_ref(), mint().as_ref()],
            &DEFAULT_PROGRAM_ID,
        )
        .unwrap();

        assert_eq!(accounts.vault_authority, vault);
        assert_eq!(accounts.stake_record, record);
        assert_eq!(
            accounts.user_token_account,
            get_associated_token_address(&user(), &mint()).unwrap()
        );
        assert_eq!(
            accounts.vault_token_account,
            get_associated_token_address(&vault, &mint()).unwrap()
        );
    }

    #[test]
    fn stake_instruction_abi() {
        let program = StakeProgram::default();
        let accounts = program.stake_accounts(&user(), &mint()).unwrap();
        let ix = program.stake_instruction(&accounts, 1_230_000);

        assert_eq!(ix.program_id, DEFAULT_PROGRAM_ID);
        assert_eq!(ix.data.len(), 16);
        assert_eq!(&ix.data[..8], &discriminator("global", "do_stake"));
        assert_eq!(&ix.data[8..], &1_230_000u64.to_le_bytes());

        let keys: Vec<Pubkey> = ix.accounts.iter().map(|m| m.pubkey).collect();
        assert_eq!(
            keys,
            vec![
                accounts.user,
                accounts.mint,
                accounts.vault_authority,
                accounts.user_token_account,
                accounts.vault_token_account,
                accounts.stake_record,
                TOKEN_PROGRAM_ID,
                ASSOCIATED_TOKEN_PROGRAM_ID,
                SYSTEM_PROGRAM_ID,
            ]
        );
        let writable: Vec<bool> = ix.accounts.iter().map(|m| m.is_writable).collect();
        assert_eq!(
            writable,
            vec![true, false, false, true, true, true, false, false, false]
        );
        assert!(ix.accounts[0].is_signer);
        assert!(ix.accounts[1..].iter().all(|m| !m.is_signer));
    }

    #[test]
    fn program_error_codes() {
        for err in [
            StakeProgramError::OwnerMismatch,
            StakeProgramError::MintMismatch,
            StakeProgramError::MathOverflow,
        ] {
            assert_eq!(StakeProgramError::from_code(err.code()), Some(err));
        }
        assert_eq!(StakeProgramError::from_code(1), None);
    }
}
