//! The ledger RPC capability.
//!
//! Every component receives the endpoint as an explicit `&dyn LedgerRpc`
//! rather than reaching for a global connection. The transport behind it
//! (HTTP, websockets, base64 envelopes) lives outside this crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use sol_primitives::{Hash, Pubkey, Signature};
use thiserror::Error;

/// Durability requested when confirming a transaction. Ordered from
/// weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        })
    }
}

/// Raw account as returned by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountData {
    /// Program that owns the account.
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// Why an instruction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionError {
    /// A program-defined error code.
    Custom(u32),
    /// Any runtime-defined failure, by name.
    Other(String),
}

/// Why a transaction failed, as reported by preflight or by its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    InstructionError { index: u8, error: InstructionError },
    BlockhashNotFound,
    SignatureFailure,
    AccountNotFound,
    Other(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::InstructionError {
                index,
                error: InstructionError::Custom(code),
            } => write!(f, "instruction {index} failed with custom error {code}"),
            TransactionError::InstructionError {
                index,
                error: InstructionError::Other(name),
            } => write!(f, "instruction {index} failed: {name}"),
            TransactionError::BlockhashNotFound => f.write_str("blockhash not found"),
            TransactionError::SignatureFailure => f.write_str("signature verification failed"),
            TransactionError::AccountNotFound => f.write_str("fee payer account not found"),
            TransactionError::Other(msg) => f.write_str(msg),
        }
    }
}

/// Status of a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
    pub slot: u64,
    /// Highest commitment reached so far.
    pub commitment: Commitment,
    /// `Some` when the transaction landed but failed.
    pub err: Option<TransactionError>,
}

/// One transaction's worth of program output pushed by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramNotification {
    pub signature: Signature,
    pub slot: u64,
    /// Raw event payloads the program emitted, already stripped of the
    /// transport's text encoding.
    pub data: Vec<Vec<u8>>,
}

/// Transport-level subscription id.
pub type SubscriptionId = u64;

/// Receiver for program notifications. Invoked on the transport's thread.
pub type NotificationSink = Box<dyn FnMut(ProgramNotification) + Send + 'static>;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The endpoint could not be reached or timed out. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Preflight or the runtime rejected the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(TransactionError),

    /// The endpoint answered with something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

/// Network calls the client needs from a ledger endpoint.
pub trait LedgerRpc: Send + Sync {
    /// Fetch one account. `Ok(None)` means the account does not exist.
    fn get_account(&self, address: &Pubkey) -> Result<Option<AccountData>, RpcError>;

    /// All accounts owned by `program_id`.
    fn get_program_accounts(
        &self,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, AccountData)>, RpcError>;

    fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Submit a signed wire-format transaction.
    fn send_transaction(&self, wire: &[u8]) -> Result<Signature, RpcError>;

    /// `Ok(None)` while the signature is unknown to the endpoint.
    fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionStatus>, RpcError>;

    /// Push every notification for transactions invoking `program_id`.
    fn subscribe_program(
        &self,
        program_id: &Pubkey,
        sink: NotificationSink,
    ) -> Result<SubscriptionId, RpcError>;

    /// Stop a subscription. Unknown ids are not an error.
    fn unsubscribe_program(&self, id: SubscriptionId) -> Result<(), RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_ordering() {
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
        assert_eq!(Commitment::default(), Commitment::Confirmed);
    }

    #[test]
    fn commitment_serde_is_lowercase() {
        let json = serde_json::to_string(&Commitment::Finalized).unwrap();
        assert_eq!(json, "\"finalized\"");
        let back: Commitment = serde_json::from_str("\"processed\"").unwrap();
        assert_eq!(back, Commitment::Processed);
    }

    #[test]
    fn display_custom_instruction_error() {
        let err = TransactionError::InstructionError {
            index: 2,
            error: InstructionError::Custom(6001),
        };
        assert_eq!(err.to_string(), "instruction 2 failed with custom error 6001");
    }

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(RpcError::Transport("connection reset".into()).is_transient());
        assert!(!RpcError::InvalidResponse("bad json".into()).is_transient());
        assert!(!RpcError::Rejected(TransactionError::BlockhashNotFound).is_transient());
    }
}
