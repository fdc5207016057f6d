//! Account Resolver: find an associated token account or arrange its creation.

use std::thread;

use sol_primitives::{
    build_create_associated_token_account_idempotent, get_associated_token_address_checked,
    Keypair, Pubkey, Signature, SolInstruction, TokenAccount, TOKEN_PROGRAM_ID,
};
use tracing::{debug, info, warn};

use crate::config::{CreationPolicy, RetryPolicy};
use crate::error::StakeClientError;
use crate::rpc::{AccountData, LedgerRpc};
use crate::submitter::TransactionSubmitter;

/// A resolved associated token account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHandle {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    /// The account was already on the ledger when resolution started.
    pub existed: bool,
    /// Idempotent creation instruction still to be submitted (batch policy).
    pub create_instruction: Option<SolInstruction>,
    /// Signature of the creation transaction (immediate policy).
    pub created_by: Option<Signature>,
}

impl AccountHandle {
    pub fn needs_creation(&self) -> bool {
        self.create_instruction.is_some()
    }
}

/// Read `address`, retrying transport failures with backoff.
///
/// Non-transient RPC errors are returned at once.
pub(crate) fn fetch_account_with_retry(
    rpc: &dyn LedgerRpc,
    address: &Pubkey,
    retry: &RetryPolicy,
) -> Result<Option<AccountData>, StakeClientError> {
    let attempts = retry.attempts();
    let mut attempt = 1;
    loop {
        match rpc.get_account(address) {
            Ok(account) => return Ok(account),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = retry.backoff(attempt);
                warn!(
                    address = %address,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "account read failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(StakeClientError::AccountResolutionFailed {
                    address: *address,
                    attempts,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub struct AccountResolver<'a> {
    rpc: &'a dyn LedgerRpc,
    submitter: &'a TransactionSubmitter<'a>,
    payer: &'a Keypair,
    retry: RetryPolicy,
    policy: CreationPolicy,
}

impl<'a> AccountResolver<'a> {
    pub fn new(
        rpc: &'a dyn LedgerRpc,
        submitter: &'a TransactionSubmitter<'a>,
        payer: &'a Keypair,
        retry: RetryPolicy,
        policy: CreationPolicy,
    ) -> Self {
        Self {
            rpc,
            submitter,
            payer,
            retry,
            policy,
        }
    }

    /// Resolve the associated token account of `owner` for `mint`.
    ///
    /// An existing account is returned as-is after checking that it really
    /// is a token account for `(mint, owner)`. A missing one yields either a
    /// creation instruction or a confirmed creation, depending on the policy.
    /// Resolving twice never creates twice: creation is idempotent on-chain.
    pub fn resolve_or_create(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
        allow_off_curve_owner: bool,
    ) -> Result<AccountHandle, StakeClientError> {
        let address = get_associated_token_address_checked(owner, mint, allow_off_curve_owner)?;

        if let Some(account) = fetch_account_with_retry(self.rpc, &address, &self.retry)? {
            check_token_account(&address, &account, mint, owner)?;
            debug!(address = %address, owner = %owner, "token account exists");
            return Ok(AccountHandle {
                address,
                mint: *mint,
                owner: *owner,
                existed: true,
                create_instruction: None,
                created_by: None,
            });
        }

        let instruction =
            build_create_associated_token_account_idempotent(&self.payer.pubkey(), owner, mint)?;

        match self.policy {
            CreationPolicy::Batch => {
                debug!(address = %address, owner = %owner, "token account missing, creation batched");
                Ok(AccountHandle {
                    address,
                    mint: *mint,
                    owner: *owner,
                    existed: false,
                    create_instruction: Some(instruction),
                    created_by: None,
                })
            }
            CreationPolicy::Immediate => {
                let signature = self
                    .submitter
                    .submit(&[instruction], &self.payer.pubkey(), &[self.payer])?;
                info!(address = %address, owner = %owner, signature = %signature, "token account created");
                Ok(AccountHandle {
                    address,
                    mint: *mint,
                    owner: *owner,
                    existed: false,
                    create_instruction: None,
                    created_by: Some(signature),
                })
            }
        }
    }
}

fn check_token_account(
    address: &Pubkey,
    account: &AccountData,
    mint: &Pubkey,
    owner: &Pubkey,
) -> Result<(), StakeClientError> {
    let invalid = |reason: String| StakeClientError::InvalidTokenAccount {
        address: *address,
        reason,
    };

    if account.owner != TOKEN_PROGRAM_ID {
        return Err(invalid(format!("owned by program {}", account.owner)));
    }
    let token = TokenAccount::unpack(&account.data).map_err(|e| invalid(e.to_string()))?;
    if token.mint != *mint {
        return Err(invalid(format!("holds mint {}, expected {mint}", token.mint)));
    }
    if token.owner != *owner {
        return Err(invalid(format!(
            "belongs to {}, expected {owner}",
            token.owner
        )));
    }
    Ok(())
}
