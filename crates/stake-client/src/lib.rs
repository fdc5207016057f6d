//! Client for the token staking program.
//!
//! A stake moves tokens from the user's associated token account into a
//! vault owned by a program-derived authority, and bumps a per-(user, mint)
//! stake record. This crate derives every address involved, makes sure the
//! token accounts exist, submits and confirms the transaction, listens for
//! the program's `StakeEvent`, and finally reads the stake record back,
//! since only the record is authoritative.
//!
//! The ledger endpoint is abstracted behind [`rpc::LedgerRpc`]. With the
//! `local-ledger` feature, `local` provides an in-process implementation.

pub mod cli;
pub mod config;
pub mod error;
pub mod listener;
#[cfg(any(test, feature = "local-ledger"))]
pub mod local;
pub mod operation;
pub mod program;
pub mod reconciler;
pub mod resolver;
pub mod rpc;
pub mod submitter;

pub use config::{Cluster, CreationPolicy, RetryPolicy, StakeConfig};
pub use error::{ProgramRejection, StakeClientError};
pub use listener::{EventListener, ObservedEvent, ProgramEvent, SubscriptionHandle};
#[cfg(any(test, feature = "local-ledger"))]
pub use local::{Faults, LocalLedger};
pub use operation::{list_stake_records, StakeClient, StakeReport};
pub use program::{
    StakeAccounts, StakeEvent, StakeProgram, StakeProgramError, StakeRecord, DEFAULT_PROGRAM_ID,
};
pub use reconciler::StateReconciler;
pub use resolver::{AccountHandle, AccountResolver};
pub use rpc::{
    AccountData, Commitment, LedgerRpc, ProgramNotification, RpcError, TransactionError,
    TransactionStatus,
};
pub use submitter::TransactionSubmitter;
