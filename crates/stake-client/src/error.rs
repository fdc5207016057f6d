use std::fmt;

use sol_primitives::{Pubkey, Signature, SolError};
use thiserror::Error;

use crate::program::StakeProgramError;
use crate::rpc::RpcError;

/// An instruction error raised by a program, with enough context to look
/// the failure up on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRejection {
    /// `None` when preflight refused the transaction before it got an id.
    pub signature: Option<Signature>,
    pub instruction_index: u8,
    /// Program the failing instruction targeted, when known.
    pub program_id: Option<Pubkey>,
    /// The program's own error code, verbatim.
    pub code: u32,
    /// Decoded staking program error, when the staking program raised it.
    pub stake_error: Option<StakeProgramError>,
}

impl fmt::Display for ProgramRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instruction {} returned code {}",
            self.instruction_index, self.code
        )?;
        if let Some(err) = self.stake_error {
            write!(f, " ({err})")?;
        }
        if let Some(program) = self.program_id {
            write!(f, " in program {program}")?;
        }
        if let Some(sig) = self.signature {
            write!(f, ", tx {sig}")?;
        }
        Ok(())
    }
}

/// Errors raised by the staking client.
#[derive(Debug, Error)]
pub enum StakeClientError {
    #[error("no viable bump seed found for program address")]
    DerivationExhausted,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("could not resolve account {address} after {attempts} attempts: {reason}")]
    AccountResolutionFailed {
        address: Pubkey,
        attempts: u32,
        reason: String,
    },

    #[error("account {address} is not a usable token account: {reason}")]
    InvalidTokenAccount { address: Pubkey, reason: String },

    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// The signed transaction left for the endpoint but no reply came back.
    /// It may or may not land.
    #[error("no reply to submission of {signature}: {reason}")]
    SendUnacknowledged { signature: Signature, reason: String },

    /// The transaction may or may not have landed. Re-query state before
    /// doing anything else; never resubmit blindly.
    #[error("confirmation of {signature} timed out after {waited_ms} ms")]
    ConfirmationTimeout { signature: Signature, waited_ms: u64 },

    #[error("program rejected transaction: {0}")]
    ProgramRejected(ProgramRejection),

    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: Signature, reason: String },

    /// The fetched record belongs to a different (owner, mint). Signals a
    /// derivation or configuration bug.
    #[error(
        "stake record {record} mismatch: expected owner {expected_owner} mint {expected_mint}, \
         found owner {observed_owner} mint {observed_mint}"
    )]
    RecordMismatch {
        record: Pubkey,
        expected_owner: Pubkey,
        expected_mint: Pubkey,
        observed_owner: Pubkey,
        observed_mint: Pubkey,
    },

    #[error("stake record {record} is stale: expected total >= {expected_minimum}, observed {observed:?}")]
    StateStale {
        record: Pubkey,
        expected_minimum: u64,
        /// `None` when the record does not exist yet.
        observed: Option<u64>,
    },

    #[error(
        "stake record {record} still stale after {attempts} reads: expected total >= \
         {expected_minimum}, last observed {observed:?}"
    )]
    ReconcileTimeout {
        record: Pubkey,
        attempts: u32,
        expected_minimum: u64,
        observed: Option<u64>,
    },

    #[error("account decode failed: {0}")]
    AccountDecode(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("primitive error: {0}")]
    Primitive(String),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl StakeClientError {
    /// Whether retrying the same step later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StakeClientError::AccountResolutionFailed { .. }
            | StakeClientError::StateStale { .. } => true,
            StakeClientError::Rpc(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the outcome on the ledger is unknown and must be re-queried.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            StakeClientError::ConfirmationTimeout { .. }
                | StakeClientError::SendUnacknowledged { .. }
        )
    }

    /// Process exit code for the command-line entry points.
    pub fn exit_code(&self) -> i32 {
        match self {
            StakeClientError::Config(_) | StakeClientError::InvalidAmount(_) => 2,
            StakeClientError::ConfirmationTimeout { .. }
            | StakeClientError::SendUnacknowledged { .. } => 3,
            StakeClientError::ProgramRejected(_) | StakeClientError::TransactionFailed { .. } => 4,
            StakeClientError::RecordMismatch { .. } => 5,
            StakeClientError::StateStale { .. } | StakeClientError::ReconcileTimeout { .. } => 6,
            _ => 1,
        }
    }
}

impl From<SolError> for StakeClientError {
    fn from(e: SolError) -> Self {
        match e {
            SolError::DerivationExhausted => StakeClientError::DerivationExhausted,
            SolError::InvalidAddress(msg) | SolError::InvalidPublicKey(msg) => {
                StakeClientError::InvalidAddress(msg)
            }
            SolError::InvalidAccountData(msg) => StakeClientError::AccountDecode(msg),
            other => StakeClientError::Primitive(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_exhausted_maps_through() {
        let err: StakeClientError = SolError::DerivationExhausted.into();
        assert!(matches!(err, StakeClientError::DerivationExhausted));
    }

    #[test]
    fn off_curve_owner_maps_to_invalid_address() {
        let err: StakeClientError = SolError::InvalidAddress("token owner is off-curve".into()).into();
        assert!(matches!(err, StakeClientError::InvalidAddress(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        let stale = StakeClientError::StateStale {
            record: Pubkey::default(),
            expected_minimum: 10,
            observed: Some(5),
        };
        assert!(stale.is_retryable());

        let resolution = StakeClientError::AccountResolutionFailed {
            address: Pubkey::default(),
            attempts: 3,
            reason: "connection refused".into(),
        };
        assert!(resolution.is_retryable());

        let timeout = StakeClientError::ConfirmationTimeout {
            signature: Signature::default(),
            waited_ms: 30_000,
        };
        assert!(!timeout.is_retryable());
        assert!(timeout.is_ambiguous());

        let transport: StakeClientError = RpcError::Transport("reset".into()).into();
        assert!(transport.is_retryable());

        let unacknowledged = StakeClientError::SendUnacknowledged {
            signature: Signature::default(),
            reason: "read timed out".into(),
        };
        assert!(unacknowledged.is_ambiguous());
        assert!(!unacknowledged.is_retryable());
        assert_eq!(unacknowledged.exit_code(), 3);
    }

    #[test]
    fn exit_codes_are_nonzero() {
        let errs = [
            StakeClientError::DerivationExhausted,
            StakeClientError::Config("TOKEN_MINT is not set".into()),
            StakeClientError::ConfirmationTimeout {
                signature: Signature::default(),
                waited_ms: 1,
            },
            StakeClientError::SubmissionFailed("down".into()),
        ];
        for err in errs {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn display_program_rejection() {
        let err = StakeClientError::ProgramRejected(ProgramRejection {
            signature: None,
            instruction_index: 1,
            program_id: None,
            code: 6001,
            stake_error: Some(StakeProgramError::MintMismatch),
        });
        assert_eq!(
            err.to_string(),
            "program rejected transaction: instruction 1 returned code 6001 \
             (Mint does not match staker record)"
        );
    }

    #[test]
    fn display_state_stale_shows_missing_record() {
        let err = StakeClientError::StateStale {
            record: Pubkey::default(),
            expected_minimum: 1200,
            observed: None,
        };
        let msg = err.to_string();
        assert!(msg.contains(">= 1200"));
        assert!(msg.contains("None"));
    }
}
