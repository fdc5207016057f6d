//! Transaction Submitter: compile, sign, send, confirm.
//!
//! Confirmation is bounded. A timeout is reported as
//! [`StakeClientError::ConfirmationTimeout`] and is never retried here: the
//! transaction may still land, so the caller has to re-read state before
//! deciding anything. A send whose reply is lost is settled the same way,
//! by polling the signature it was signed with.

use std::thread;
use std::time::{Duration, Instant};

use sol_primitives::{compile_message, Keypair, Pubkey, Signature, SolInstruction, Transaction};
use tracing::{debug, info, warn};

use crate::config::StakeConfig;
use crate::error::{ProgramRejection, StakeClientError};
use crate::program::StakeProgramError;
use crate::rpc::{Commitment, InstructionError, LedgerRpc, RpcError, TransactionError, TransactionStatus};

pub struct TransactionSubmitter<'a> {
    rpc: &'a dyn LedgerRpc,
    commitment: Commitment,
    timeout: Duration,
    poll_interval: Duration,
    /// Program whose custom error codes are decoded into `StakeProgramError`.
    stake_program: Option<Pubkey>,
}

impl<'a> TransactionSubmitter<'a> {
    pub fn new(
        rpc: &'a dyn LedgerRpc,
        commitment: Commitment,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rpc,
            commitment,
            timeout,
            poll_interval,
            stake_program: None,
        }
    }

    pub fn from_config(rpc: &'a dyn LedgerRpc, config: &StakeConfig) -> Self {
        Self::new(
            rpc,
            config.commitment,
            config.confirm_timeout(),
            config.poll_interval(),
        )
        .with_stake_program(config.program_id)
    }

    pub fn with_stake_program(mut self, program_id: Pubkey) -> Self {
        self.stake_program = Some(program_id);
        self
    }

    /// Sign and send `instructions`, then wait for the configured commitment.
    ///
    /// `signers` must hold the fee payer and every signer the instructions
    /// require, and nothing else.
    pub fn submit(
        &self,
        instructions: &[SolInstruction],
        fee_payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, StakeClientError> {
        let program_ids: Vec<Pubkey> = instructions.iter().map(|ix| ix.program_id).collect();
        let signature = match self.send(instructions, fee_payer, signers) {
            Ok(signature) => signature,
            Err(StakeClientError::SendUnacknowledged { signature, reason }) => {
                warn!(signature = %signature, error = %reason, "send unacknowledged, polling status");
                signature
            }
            Err(e) => return Err(e),
        };
        self.confirm(&signature, &program_ids)?;
        Ok(signature)
    }

    /// Sign and send without waiting for confirmation.
    ///
    /// Once signed, a transport failure on the send yields
    /// [`StakeClientError::SendUnacknowledged`] carrying the signature, since
    /// the transaction may have reached the ledger.
    pub fn send(
        &self,
        instructions: &[SolInstruction],
        fee_payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, StakeClientError> {
        if signers.is_empty() {
            return Err(StakeClientError::SubmissionFailed(
                "at least one signer is required".into(),
            ));
        }
        let program_ids: Vec<Pubkey> = instructions.iter().map(|ix| ix.program_id).collect();

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .map_err(|e| self.send_error(e, &program_ids))?;

        let message = compile_message(instructions, fee_payer, &blockhash)?;
        let tx = Transaction::new_signed(message, signers)?;
        let signature = tx.id().ok_or_else(|| {
            StakeClientError::SubmissionFailed("signed transaction has no signature".into())
        })?;

        let returned = match self.rpc.send_transaction(&tx.to_wire()) {
            Ok(returned) => returned,
            Err(RpcError::Rejected(err)) => {
                return Err(self.map_transaction_error(err, None, &program_ids))
            }
            Err(e) => {
                warn!(signature = %signature, error = %e, "no reply to send");
                return Err(StakeClientError::SendUnacknowledged {
                    signature,
                    reason: e.to_string(),
                });
            }
        };
        if returned != signature {
            warn!(expected = %signature, returned = %returned, "endpoint returned a different signature");
        }

        info!(
            signature = %signature,
            instructions = instructions.len(),
            "transaction submitted"
        );
        Ok(signature)
    }

    /// Poll until `signature` reaches the configured commitment.
    ///
    /// `program_ids` lists the program of each instruction in order, so that
    /// a failing instruction can be attributed and, for the staking program,
    /// decoded. Pass an empty slice when unknown.
    pub fn confirm(
        &self,
        signature: &Signature,
        program_ids: &[Pubkey],
    ) -> Result<TransactionStatus, StakeClientError> {
        let started = Instant::now();

        loop {
            match self.rpc.get_signature_status(signature) {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        return Err(self.map_transaction_error(err, Some(*signature), program_ids));
                    }
                    if status.commitment >= self.commitment {
                        info!(
                            signature = %signature,
                            slot = status.slot,
                            commitment = %status.commitment,
                            "transaction confirmed"
                        );
                        return Ok(status);
                    }
                    debug!(signature = %signature, reached = %status.commitment, "waiting for commitment");
                }
                Ok(None) => debug!(signature = %signature, "signature not yet known"),
                // Status polls are reads; keep polling until the deadline.
                Err(e) => warn!(signature = %signature, error = %e, "status poll failed"),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                warn!(signature = %signature, waited_ms = elapsed.as_millis() as u64, "confirmation timed out");
                return Err(StakeClientError::ConfirmationTimeout {
                    signature: *signature,
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            thread::sleep(self.poll_interval.min(self.timeout - elapsed));
        }
    }

    fn send_error(&self, err: RpcError, program_ids: &[Pubkey]) -> StakeClientError {
        match err {
            RpcError::Rejected(tx_err) => self.map_transaction_error(tx_err, None, program_ids),
            other => StakeClientError::SubmissionFailed(other.to_string()),
        }
    }

    fn map_transaction_error(
        &self,
        err: TransactionError,
        signature: Option<Signature>,
        program_ids: &[Pubkey],
    ) -> StakeClientError {
        match err {
            TransactionError::InstructionError {
                index,
                error: InstructionError::Custom(code),
            } => {
                let program_id = program_ids.get(index as usize).copied();
                let stake_error = match (program_id, self.stake_program) {
                    (Some(p), Some(stake)) if p == stake => StakeProgramError::from_code(code),
                    _ => None,
                };
                StakeClientError::ProgramRejected(ProgramRejection {
                    signature,
                    instruction_index: index,
                    program_id,
                    code,
                    stake_error,
                })
            }
            other => match signature {
                Some(signature) => StakeClientError::TransactionFailed {
                    signature,
                    reason: other.to_string(),
                },
                None => StakeClientError::SubmissionFailed(other.to_string()),
            },
        }
    }
}
