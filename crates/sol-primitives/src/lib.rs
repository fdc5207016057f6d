//! Ledger primitives for the staking client.
//!
//! This crate handles addresses, program-derived address derivation, SPL
//! token account layouts and the transaction wire format, all without
//! pulling in `solana-sdk` (which drags in tokio and 200+ transitive
//! dependencies).
//!
//! Nothing here touches the network. The wire format is implemented by
//! hand, using `ed25519-dalek` for signing, `curve25519-dalek` for the
//! off-curve test and `bs58` for the text forms.

pub mod address;
pub mod error;
pub mod keypair;
pub mod pda;
pub mod spl_token;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::{Hash, Pubkey};
pub use error::SolError;
pub use keypair::{Keypair, Signature};
pub use pda::{create_program_address, find_program_address};
pub use spl_token::{
    build_create_associated_token_account_idempotent, get_associated_token_address,
    get_associated_token_address_checked, Mint, TokenAccount, TokenAccountState,
    ASSOCIATED_TOKEN_PROGRAM_ID, MINT_LEN, TOKEN_ACCOUNT_LEN, TOKEN_ERROR_INSUFFICIENT_FUNDS,
    TOKEN_PROGRAM_ID,
};
pub use transaction::{
    compile_message, decode_compact_u16, encode_compact_u16, CompiledInstruction, Message,
    SolAccountMeta, SolInstruction, Transaction, SYSTEM_PROGRAM_ID,
};
