//! End-to-end staking flow built from the components.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use sol_primitives::{Keypair, Mint, Pubkey, Signature, SolInstruction, TOKEN_PROGRAM_ID};
use tracing::{debug, info, warn};

use crate::config::StakeConfig;
use crate::error::StakeClientError;
use crate::listener::{EventListener, ObservedEvent, SubscriptionHandle};
use crate::program::{StakeAccounts, StakeEvent, StakeProgram, StakeRecord};
use crate::reconciler::StateReconciler;
use crate::resolver::{fetch_account_with_retry, AccountResolver};
use crate::rpc::LedgerRpc;
use crate::submitter::TransactionSubmitter;

/// Outcome of one confirmed and reconciled stake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeReport {
    pub signature: Signature,
    pub accounts: StakeAccounts,
    pub amount: u64,
    /// Record total read before submitting; zero when there was no record.
    pub previous_total: u64,
    /// The authoritative record after the stake.
    pub record: StakeRecord,
    /// The program's event for this transaction, if one arrived in time.
    pub event: Option<ObservedEvent<StakeEvent>>,
    /// Token accounts created along the way.
    pub created_accounts: Vec<Pubkey>,
}

impl StakeReport {
    /// `false` when the event and the record disagree, which happens when
    /// another stake on the same record landed in between.
    pub fn event_consistent(&self) -> bool {
        self.event
            .as_ref()
            .map_or(true, |observed| observed.event.new_total == self.record.total)
    }
}

/// Every stake record `program_id` owns, ordered by address.
///
/// Program accounts that are not stake records are skipped.
pub fn list_stake_records(
    rpc: &dyn LedgerRpc,
    program_id: &Pubkey,
) -> Result<Vec<(Pubkey, StakeRecord)>, StakeClientError> {
    let discriminator = StakeRecord::account_discriminator();
    let mut records = Vec::new();
    for (address, account) in rpc.get_program_accounts(program_id)? {
        if !account.data.starts_with(&discriminator) {
            continue;
        }
        match StakeRecord::decode(&account.data) {
            Ok(record) => records.push((address, record)),
            Err(e) => warn!(address = %address, error = %e, "skipping undecodable stake record"),
        }
    }
    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(records)
}

/// Staking client bound to one endpoint and one configuration.
pub struct StakeClient<'a> {
    rpc: &'a dyn LedgerRpc,
    config: StakeConfig,
    program: StakeProgram,
}

impl<'a> StakeClient<'a> {
    pub fn new(rpc: &'a dyn LedgerRpc, config: StakeConfig) -> Result<Self, StakeClientError> {
        config.validate()?;
        let program = StakeProgram::new(config.program_id);
        Ok(Self {
            rpc,
            config,
            program,
        })
    }

    pub fn config(&self) -> &StakeConfig {
        &self.config
    }

    pub fn program(&self) -> &StakeProgram {
        &self.program
    }

    pub fn submitter(&self) -> TransactionSubmitter<'a> {
        TransactionSubmitter::from_config(self.rpc, &self.config)
    }

    pub fn listener(&self) -> EventListener<'a> {
        EventListener::new(self.rpc, self.program.program_id)
    }

    pub fn reconciler(&self) -> StateReconciler<'a> {
        StateReconciler::new(self.rpc, self.program, self.config.reconcile_retry)
    }

    /// Decimals of the configured mint.
    pub fn mint_decimals(&self) -> Result<u8, StakeClientError> {
        let mint = &self.config.mint;
        let account = fetch_account_with_retry(self.rpc, mint, &self.config.resolve_retry)?
            .ok_or_else(|| StakeClientError::InvalidAddress(format!("mint {mint} not found")))?;
        if account.owner != TOKEN_PROGRAM_ID {
            return Err(StakeClientError::InvalidAddress(format!(
                "{mint} is owned by {}, not the token program",
                account.owner
            )));
        }
        let state = Mint::unpack(&account.data)?;
        if !state.is_initialized {
            return Err(StakeClientError::InvalidAddress(format!(
                "mint {mint} is not initialized"
            )));
        }
        Ok(state.decimals)
    }

    pub fn list_stake_records(&self) -> Result<Vec<(Pubkey, StakeRecord)>, StakeClientError> {
        list_stake_records(self.rpc, &self.program.program_id)
    }

    /// Stake `amount` base units of the configured mint from `payer`, then
    /// confirm the result by reading the stake record.
    ///
    /// Missing token accounts are created in the same transaction (or
    /// beforehand, under the immediate creation policy). The event
    /// subscription is always released before this returns.
    pub fn stake_and_verify(
        &self,
        payer: &Keypair,
        amount: u64,
    ) -> Result<StakeReport, StakeClientError> {
        if amount == 0 {
            return Err(StakeClientError::InvalidAmount("amount must be > 0".into()));
        }
        let user = payer.pubkey();
        let mint = self.config.mint;
        let accounts = self.program.stake_accounts(&user, &mint)?;
        info!(user = %user, mint = %mint, amount, record = %accounts.stake_record, "staking");

        let submitter = self.submitter();
        let resolver = AccountResolver::new(
            self.rpc,
            &submitter,
            payer,
            self.config.resolve_retry,
            self.config.creation_policy,
        );
        let user_ata = resolver.resolve_or_create(&mint, &user, false)?;
        let vault_ata = resolver.resolve_or_create(&mint, &accounts.vault_authority, true)?;
        if user_ata.address != accounts.user_token_account
            || vault_ata.address != accounts.vault_token_account
        {
            return Err(StakeClientError::InvalidAddress(
                "resolved token accounts disagree with derived accounts".into(),
            ));
        }

        let reconciler = self.reconciler();
        let previous_total = reconciler
            .fetch(&user, &mint)?
            .map_or(0, |record| record.total);
        let minimum = previous_total.checked_add(amount).ok_or_else(|| {
            StakeClientError::InvalidAmount(format!(
                "staking {amount} on top of {previous_total} overflows"
            ))
        })?;

        let mut created_accounts = Vec::new();
        let mut instructions = Vec::new();
        for handle in [&user_ata, &vault_ata] {
            if !handle.existed {
                created_accounts.push(handle.address);
            }
            if let Some(ix) = &handle.create_instruction {
                instructions.push(ix.clone());
            }
        }
        instructions.push(self.program.stake_instruction(&accounts, amount));

        let (mut subscription, events) = self.listener().subscribe_channel::<StakeEvent>()?;

        let outcome = self.submit_and_reconcile(
            &submitter,
            &reconciler,
            payer,
            &instructions,
            &accounts,
            minimum,
            &events,
        );
        release(&mut subscription);
        let (signature, record, event) = outcome?;

        let report = StakeReport {
            signature,
            accounts,
            amount,
            previous_total,
            record,
            event,
            created_accounts,
        };
        if !report.event_consistent() {
            warn!(
                signature = %signature,
                record_total = report.record.total,
                "event total differs from record; another stake landed in between"
            );
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_and_reconcile(
        &self,
        submitter: &TransactionSubmitter<'_>,
        reconciler: &StateReconciler<'_>,
        payer: &Keypair,
        instructions: &[SolInstruction],
        accounts: &StakeAccounts,
        minimum: u64,
        events: &Receiver<ObservedEvent<StakeEvent>>,
    ) -> Result<(Signature, StakeRecord, Option<ObservedEvent<StakeEvent>>), StakeClientError> {
        let signature = submitter.submit(instructions, &payer.pubkey(), &[payer])?;

        let mut event = take_event(events, &signature, Duration::ZERO);
        let record = reconciler.reconcile_with_backoff(
            &accounts.user,
            &accounts.mint,
            minimum,
            event.as_ref().map(|observed| &observed.event),
        )?;

        if event.is_none() {
            event = take_event(events, &signature, self.config.event_wait());
        }
        match &event {
            Some(observed) => debug!(signature = %signature, slot = observed.slot, "stake event observed"),
            None => warn!(
                signature = %signature,
                waited_ms = self.config.event_wait_ms,
                "no stake event observed"
            ),
        }
        Ok((signature, record, event))
    }
}

/// First event emitted by `signature`, waiting at most `wait`.
///
/// Events from other transactions and duplicates are discarded.
fn take_event(
    events: &Receiver<ObservedEvent<StakeEvent>>,
    signature: &Signature,
    wait: Duration,
) -> Option<ObservedEvent<StakeEvent>> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let next = if remaining.is_zero() {
            events.try_recv().ok()
        } else {
            match events.recv_timeout(remaining) {
                Ok(observed) => Some(observed),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            }
        };
        match next {
            Some(observed) if observed.signature == *signature => return Some(observed),
            Some(observed) => {
                debug!(signature = %observed.signature, "ignoring event from another transaction")
            }
            None => return None,
        }
    }
}

fn release(subscription: &mut SubscriptionHandle<'_>) {
    if let Err(e) = subscription.unsubscribe() {
        warn!(error = %e, "failed to release event subscription");
    }
}
