//! State Reconciler: the authoritative read of a stake record.
//!
//! Success is decided here, never by an event. A matching event can only
//! raise the lower bound the record must reach.

use std::thread;

use sol_primitives::Pubkey;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::StakeClientError;
use crate::program::{StakeEvent, StakeProgram, StakeRecord};
use crate::rpc::LedgerRpc;

pub struct StateReconciler<'a> {
    rpc: &'a dyn LedgerRpc,
    program: StakeProgram,
    retry: RetryPolicy,
}

impl<'a> StateReconciler<'a> {
    pub fn new(rpc: &'a dyn LedgerRpc, program: StakeProgram, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            program,
            retry,
        }
    }

    /// Read the record for `(owner, mint)`. `Ok(None)` if it does not exist.
    ///
    /// A record whose fields name a different pair is a
    /// [`StakeClientError::RecordMismatch`].
    pub fn fetch(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Option<StakeRecord>, StakeClientError> {
        let (address, _) = self.program.stake_record_address(owner, mint)?;
        let Some(account) = self.rpc.get_account(&address)? else {
            debug!(record = %address, "stake record not found");
            return Ok(None);
        };

        if account.owner != self.program.program_id {
            return Err(StakeClientError::AccountDecode(format!(
                "stake record {address} is owned by {}, not the staking program",
                account.owner
            )));
        }
        let record = StakeRecord::decode(&account.data)?;
        if record.owner != *owner || record.mint != *mint {
            return Err(StakeClientError::RecordMismatch {
                record: address,
                expected_owner: *owner,
                expected_mint: *mint,
                observed_owner: record.owner,
                observed_mint: record.mint,
            });
        }
        Ok(Some(record))
    }

    /// One read, checked against `minimum_expected_total`.
    ///
    /// When `observed_event` is about the same `(owner, mint)` its
    /// `new_total` also becomes a lower bound. Events for other pairs are
    /// ignored.
    pub fn reconcile(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        minimum_expected_total: u64,
        observed_event: Option<&StakeEvent>,
    ) -> Result<StakeRecord, StakeClientError> {
        let minimum = lower_bound(owner, mint, minimum_expected_total, observed_event);

        match self.fetch(owner, mint)? {
            Some(record) if record.total >= minimum => Ok(record),
            observed => {
                let (record, _) = self.program.stake_record_address(owner, mint)?;
                Err(StakeClientError::StateStale {
                    record,
                    expected_minimum: minimum,
                    observed: observed.map(|r| r.total),
                })
            }
        }
    }

    /// [`reconcile`](Self::reconcile) with bounded retries on stale reads
    /// and transient transport errors.
    pub fn reconcile_with_backoff(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        minimum_expected_total: u64,
        observed_event: Option<&StakeEvent>,
    ) -> Result<StakeRecord, StakeClientError> {
        let attempts = self.retry.attempts();
        let mut last_observed = None;

        for attempt in 1..=attempts {
            match self.reconcile(owner, mint, minimum_expected_total, observed_event) {
                Ok(record) => {
                    info!(owner = %owner, mint = %mint, total = record.total, attempt, "stake record reconciled");
                    return Ok(record);
                }
                Err(StakeClientError::StateStale { observed, .. }) => {
                    last_observed = observed;
                    debug!(attempt, observed = ?observed, "stake record stale");
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "stake record read failed");
                }
                Err(e) => return Err(e),
            }
            if attempt < attempts {
                thread::sleep(self.retry.backoff(attempt));
            }
        }

        let (record, _) = self.program.stake_record_address(owner, mint)?;
        let expected_minimum = lower_bound(owner, mint, minimum_expected_total, observed_event);
        warn!(record = %record, attempts, expected_minimum, "stake record never caught up");
        Err(StakeClientError::ReconcileTimeout {
            record,
            attempts,
            expected_minimum,
            observed: last_observed,
        })
    }
}

fn lower_bound(
    owner: &Pubkey,
    mint: &Pubkey,
    minimum_expected_total: u64,
    observed_event: Option<&StakeEvent>,
) -> u64 {
    match observed_event {
        Some(event) if event.staker == *owner && event.mint == *mint => {
            minimum_expected_total.max(event.new_total)
        }
        Some(event) => {
            debug!(staker = %event.staker, mint = %event.mint, "ignoring event for another record");
            minimum_expected_total
        }
        None => minimum_expected_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_event_raises_lower_bound() {
        let owner = Pubkey::new_from_array([1; 32]);
        let mint = Pubkey::new_from_array([2; 32]);
        let event = StakeEvent {
            staker: owner,
            mint,
            amount: 700,
            new_total: 1200,
        };
        assert_eq!(lower_bound(&owner, &mint, 700, Some(&event)), 1200);
        assert_eq!(lower_bound(&owner, &mint, 1500, Some(&event)), 1500);
        assert_eq!(lower_bound(&owner, &mint, 700, None), 700);
    }

    #[test]
    fn foreign_event_is_ignored() {
        let owner = Pubkey::new_from_array([1; 32]);
        let mint = Pubkey::new_from_array([2; 32]);
        let event = StakeEvent {
            staker: Pubkey::new_from_array([3; 32]),
            mint,
            amount: 1,
            new_total: u64::MAX,
        };
        assert_eq!(lower_bound(&owner, &mint, 10, Some(&event)), 10);
    }
}
