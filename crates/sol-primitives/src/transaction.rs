//! Manual transaction wire format, signing and decoding.
//!
//! Transactions are built entirely by hand. The wire format is a compact
//! binary layout:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use crate::address::{Hash, Pubkey};
use crate::error::SolError;
use crate::keypair::{Keypair, Signature, SIGNATURE_BYTES};

/// The System Program public key: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

/// Account indices are a single byte.
const MAX_ACCOUNT_KEYS: usize = 256;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)`. Only the shortest encoding of a value
/// is accepted, and the third byte may not carry a continuation bit.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;

    for consumed in 0..3 {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError(
                "unexpected end of data while decoding compact-u16".into(),
            )
        })?;
        if consumed > 0 && byte == 0 {
            return Err(SolError::SerializationError(
                "non-canonical compact-u16 encoding".into(),
            ));
        }
        value |= ((byte & 0x7f) as u32) << (7 * consumed);

        if byte & 0x80 == 0 {
            if value > u16::MAX as u32 {
                return Err(SolError::SerializationError(
                    "compact-u16 value overflow".into(),
                ));
            }
            return Ok((value as u16, consumed + 1));
        }
        if consumed == 2 {
            return Err(SolError::SerializationError(
                "compact-u16 longer than three bytes".into(),
            ));
        }
    }

    Err(SolError::SerializationError(
        "compact-u16 longer than three bytes".into(),
    ))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolAccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool, is_writable: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable,
        }
    }

    pub fn new_readonly(pubkey: Pubkey) -> Self {
        Self::new(pubkey, false, false)
    }
}

/// An instruction before it is compiled into a message.
///
/// The order of `accounts` is part of the target program's binary interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the message's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    /// Index into `account_keys` for the program to invoke.
    pub program_id_index: u8,
    /// Indices into `account_keys` for each account the instruction reads/writes.
    pub account_indices: Vec<u8>,
    /// Opaque instruction data.
    pub data: Vec<u8>,
}

/// A transaction message: the bytes every signer signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// All account keys referenced by this message, in canonical order:
    ///   1. writable signers
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Pubkey>,

    /// Number of required signatures (first N accounts are signers).
    pub num_required_signatures: u8,
    /// How many of the signing accounts are read-only.
    pub num_readonly_signed: u8,
    /// How many of the non-signing accounts are read-only.
    pub num_readonly_unsigned: u8,

    pub recent_blockhash: Hash,

    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Keys that must sign, in signature-slot order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = self.num_required_signatures as usize;
        if index < signers {
            index < signers - self.num_readonly_signed as usize
        } else {
            index < self.account_keys.len() - self.num_readonly_unsigned as usize
        }
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        // Header: 3 bytes.
        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);

        buf.extend_from_slice(&encode_compact_u16(self.account_keys.len() as u16));
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_ref());
        }

        buf.extend_from_slice(self.recent_blockhash.as_ref());

        buf.extend_from_slice(&encode_compact_u16(self.instructions.len() as u16));
        for ix in &self.instructions {
            buf.push(ix.program_id_index);

            buf.extend_from_slice(&encode_compact_u16(ix.account_indices.len() as u16));
            buf.extend_from_slice(&ix.account_indices);

            buf.extend_from_slice(&encode_compact_u16(ix.data.len() as u16));
            buf.extend_from_slice(&ix.data);
        }

        buf
    }

    /// Parse a serialized message. Every index must point inside `account_keys`.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SolError> {
        let mut reader = Reader::new(bytes);

        let num_required_signatures = reader.byte()?;
        let num_readonly_signed = reader.byte()?;
        let num_readonly_unsigned = reader.byte()?;

        let num_accounts = reader.compact_u16()? as usize;
        let mut account_keys = Vec::with_capacity(num_accounts);
        for _ in 0..num_accounts {
            account_keys.push(Pubkey::try_from_slice(reader.take(32)?)?);
        }

        if (num_required_signatures as usize) > num_accounts
            || num_readonly_signed > num_required_signatures
            || (num_readonly_unsigned as usize) > num_accounts - num_required_signatures as usize
        {
            return Err(SolError::SerializationError(
                "message header inconsistent with account count".into(),
            ));
        }

        let mut blockhash = [0u8; 32];
        blockhash.copy_from_slice(reader.take(32)?);

        let num_instructions = reader.compact_u16()? as usize;
        let mut instructions = Vec::with_capacity(num_instructions);
        for _ in 0..num_instructions {
            let program_id_index = reader.byte()?;
            let n = reader.compact_u16()? as usize;
            let account_indices = reader.take(n)?.to_vec();
            let len = reader.compact_u16()? as usize;
            let data = reader.take(len)?.to_vec();

            let out_of_range = std::iter::once(&program_id_index)
                .chain(account_indices.iter())
                .any(|&i| i as usize >= num_accounts);
            if out_of_range {
                return Err(SolError::SerializationError(
                    "instruction references an account index out of range".into(),
                ));
            }

            instructions.push(CompiledInstruction {
                program_id_index,
                account_indices,
                data,
            });
        }

        if !reader.is_empty() {
            return Err(SolError::SerializationError(
                "trailing bytes after message".into(),
            ));
        }

        Ok(Self {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash: Hash::new_from_array(blockhash),
            instructions,
        })
    }
}

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// Sign `message` with every required signer.
    ///
    /// Each signer key in the message must be matched by exactly one keypair,
    /// and every keypair must be a required signer.
    pub fn new_signed(message: Message, signers: &[&Keypair]) -> Result<Self, SolError> {
        let message_bytes = message.serialize();

        for kp in signers {
            if !message.signer_keys().contains(&kp.pubkey()) {
                return Err(SolError::SigningError(format!(
                    "keypair {} is not a required signer",
                    kp.pubkey()
                )));
            }
        }

        let mut signatures = Vec::with_capacity(message.signer_keys().len());
        for key in message.signer_keys() {
            let kp = signers
                .iter()
                .find(|kp| kp.pubkey() == *key)
                .ok_or_else(|| SolError::SigningError(format!("missing signer for {key}")))?;
            signatures.push(kp.sign_message(&message_bytes));
        }

        Ok(Self {
            signatures,
            message,
        })
    }

    /// The transaction id: its first signature.
    pub fn id(&self) -> Option<Signature> {
        self.signatures.first().copied()
    }

    /// Serialize into wire format, ready for `sendTransaction`.
    pub fn to_wire(&self) -> Vec<u8> {
        let message_bytes = self.message.serialize();
        let mut wire =
            Vec::with_capacity(3 + SIGNATURE_BYTES * self.signatures.len() + message_bytes.len());

        wire.extend_from_slice(&encode_compact_u16(self.signatures.len() as u16));
        for sig in &self.signatures {
            wire.extend_from_slice(sig.as_ref());
        }
        wire.extend_from_slice(&message_bytes);
        wire
    }

    /// Parse a wire-format transaction.
    pub fn from_wire(wire: &[u8]) -> Result<Self, SolError> {
        let (num_sigs, compact_len) = decode_compact_u16(wire)?;

        if num_sigs == 0 {
            return Err(SolError::TransactionBuildError(
                "transaction has zero signatures".into(),
            ));
        }

        let sigs_end = compact_len + (num_sigs as usize) * SIGNATURE_BYTES;
        if sigs_end > wire.len() {
            return Err(SolError::SerializationError(
                "transaction too short: signature slots exceed length".into(),
            ));
        }

        let signatures = wire[compact_len..sigs_end]
            .chunks_exact(SIGNATURE_BYTES)
            .map(|chunk| {
                let mut sig = [0u8; SIGNATURE_BYTES];
                sig.copy_from_slice(chunk);
                Signature::new_from_array(sig)
            })
            .collect::<Vec<_>>();

        let message = Message::deserialize(&wire[sigs_end..])?;
        if message.num_required_signatures as usize != signatures.len() {
            return Err(SolError::SerializationError(format!(
                "{} signatures for {} required signers",
                signatures.len(),
                message.num_required_signatures
            )));
        }

        Ok(Self {
            signatures,
            message,
        })
    }

    /// Check every signature against its signer key.
    pub fn verify(&self) -> bool {
        let message_bytes = self.message.serialize();
        self.signatures.len() == self.message.signer_keys().len()
            && self
                .signatures
                .iter()
                .zip(self.message.signer_keys())
                .all(|(sig, key)| sig.verify(key, &message_bytes))
    }
}

// ---------------------------------------------------------------------------
// Message compilation
// ---------------------------------------------------------------------------

/// Compile instructions into a message with a single fee payer.
///
/// The fee payer is always the first signer and is placed at index 0 in the
/// account keys. Within each permission class, keys keep first-use order.
pub fn compile_message(
    instructions: &[SolInstruction],
    fee_payer: &Pubkey,
    recent_blockhash: &Hash,
) -> Result<Message, SolError> {
    struct AccountEntry {
        pubkey: Pubkey,
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();

    let mut upsert = |pubkey: Pubkey, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    // Fee payer is always signer + writable.
    upsert(*fee_payer, true, true);

    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        // Program IDs are non-signer, read-only accounts.
        upsert(ix.program_id, false, false);
    }

    if entries.len() > MAX_ACCOUNT_KEYS {
        return Err(SolError::TransactionBuildError(format!(
            "{} accounts exceed the {MAX_ACCOUNT_KEYS} account limit",
            entries.len()
        )));
    }

    // sort_by is stable, and the fee payer was inserted first into the
    // highest rank, so it stays at index 0.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    let num_signers = entries.iter().filter(|e| e.is_signer).count() as u8;
    let num_readonly_signed = entries
        .iter()
        .filter(|e| e.is_signer && !e.is_writable)
        .count() as u8;
    let num_readonly_unsigned = entries
        .iter()
        .filter(|e| !e.is_signer && !e.is_writable)
        .count() as u8;

    let account_keys: Vec<Pubkey> = entries.iter().map(|e| e.pubkey).collect();

    let index_of = |key: &Pubkey| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| {
                SolError::TransactionBuildError(format!("account {key} not in account keys"))
            })
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey))
            .collect::<Result<Vec<_>, _>>()?;

        compiled.push(CompiledInstruction {
            program_id_index: index_of(&ix.program_id)?,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(Message {
        account_keys,
        num_required_signatures: num_signers,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        instructions: compiled,
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SolError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or_else(|| {
            SolError::SerializationError("unexpected end of message data".into())
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, SolError> {
        Ok(self.take(1)?[0])
    }

    fn compact_u16(&mut self) -> Result<u16, SolError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_like(from: Pubkey, to: Pubkey) -> SolInstruction {
        SolInstruction {
            program_id: SYSTEM_PROGRAM_ID,
            accounts: vec![
                SolAccountMeta::new(from, true, true),
                SolAccountMeta::new(to, false, true),
            ],
            data: vec![2, 0, 0, 0],
        }
    }

    // -- compact-u16 --------------------------------------------------------

    #[test]
    fn compact_u16_boundaries() {
        assert_eq!(encode_compact_u16(0), vec![0x00]);
        assert_eq!(encode_compact_u16(0x7f), vec![0x7f]);
        assert_eq!(encode_compact_u16(128), vec![0x80, 0x01]);
        assert_eq!(encode_compact_u16(16383), vec![0xff, 0x7f]);
        assert_eq!(encode_compact_u16(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode_compact_u16(u16::MAX), vec![0xff, 0xff, 0x03]);
    }

    #[test]
    fn decode_compact_u16_reports_consumed() {
        assert_eq!(decode_compact_u16(&[0x7f]).unwrap(), (127, 1));
        assert_eq!(decode_compact_u16(&[0x80, 0x01, 0xAA]).unwrap(), (128, 2));
        assert_eq!(decode_compact_u16(&[0x80, 0x80, 0x01]).unwrap(), (16384, 3));
    }

    #[test]
    fn decode_compact_u16_failures() {
        assert!(decode_compact_u16(&[]).is_err());
        assert!(decode_compact_u16(&[0x80]).is_err());
        // 0x7f << 14 overflows u16.
        assert!(decode_compact_u16(&[0xff, 0xff, 0x7f]).is_err());
    }

    #[test]
    fn decode_compact_u16_rejects_non_canonical_forms() {
        // Padded encodings of 0 and 127.
        assert!(decode_compact_u16(&[0x80, 0x00]).is_err());
        assert!(decode_compact_u16(&[0xff, 0x80, 0x00]).is_err());
        // Continuation bit on the last permitted byte.
        assert!(decode_compact_u16(&[0x80, 0x80, 0x81]).is_err());
        for value in [0u16, 1, 127, 128, 255, 16383, 16384, u16::MAX] {
            let encoded = encode_compact_u16(value);
            assert_eq!(decode_compact_u16(&encoded).unwrap(), (value, encoded.len()));
        }
    }

    // -- Compilation --------------------------------------------------------

    #[test]
    fn fee_payer_first_and_program_readonly() {
        let from = Pubkey::new_from_array([1; 32]);
        let to = Pubkey::new_from_array([2; 32]);
        let msg = compile_message(&[transfer_like(from, to)], &from, &Hash::default()).unwrap();

        assert_eq!(msg.account_keys, vec![from, to, SYSTEM_PROGRAM_ID]);
        assert_eq!(msg.num_required_signatures, 1);
        assert_eq!(msg.num_readonly_signed, 0);
        assert_eq!(msg.num_readonly_unsigned, 1);
        assert_eq!(msg.instructions[0].program_id_index, 2);
        assert_eq!(msg.instructions[0].account_indices, vec![0, 1]);
    }

    #[test]
    fn separate_fee_payer_is_promoted_to_index_zero() {
        let payer = Pubkey::new_from_array([9; 32]);
        let from = Pubkey::new_from_array([1; 32]);
        let to = Pubkey::new_from_array([2; 32]);
        let msg = compile_message(&[transfer_like(from, to)], &payer, &Hash::default()).unwrap();

        assert_eq!(msg.account_keys[0], payer);
        assert_eq!(msg.account_keys[1], from);
        assert_eq!(msg.num_required_signatures, 2);
        assert!(msg.is_writable(0) && msg.is_writable(1) && msg.is_writable(2));
        assert!(!msg.is_writable(3));
        assert!(msg.is_signer(1) && !msg.is_signer(2));
    }

    #[test]
    fn duplicate_accounts_merge_permissions() {
        let key = Pubkey::new_from_array([0xAA; 32]);
        let msg = compile_message(&[transfer_like(key, key)], &key, &Hash::default()).unwrap();
        assert_eq!(msg.account_keys.len(), 2);
        assert_eq!(msg.instructions[0].account_indices, vec![0, 0]);
    }

    #[test]
    fn instruction_account_order_is_preserved() {
        let payer = Pubkey::new_from_array([1; 32]);
        let program = Pubkey::new_from_array([7; 32]);
        let a = Pubkey::new_from_array([3; 32]);
        let b = Pubkey::new_from_array([4; 32]);
        let ix = SolInstruction {
            program_id: program,
            accounts: vec![
                SolAccountMeta::new_readonly(b),
                SolAccountMeta::new(a, false, true),
            ],
            data: vec![],
        };
        let msg = compile_message(&[ix], &payer, &Hash::default()).unwrap();
        let indices = &msg.instructions[0].account_indices;
        assert_eq!(msg.account_keys[indices[0] as usize], b);
        assert_eq!(msg.account_keys[indices[1] as usize], a);
    }

    // -- Serialization ------------------------------------------------------

    #[test]
    fn message_serialization_layout() {
        let from = Pubkey::new_from_array([1; 32]);
        let to = Pubkey::new_from_array([2; 32]);
        let blockhash = Hash::new_from_array([0xCC; 32]);
        let msg = compile_message(&[transfer_like(from, to)], &from, &blockhash).unwrap();
        let bytes = msg.serialize();

        assert_eq!(&bytes[..3], &[1, 0, 1]);
        let offset = 3 + 1 + 32 * msg.account_keys.len();
        assert_eq!(&bytes[offset..offset + 32], blockhash.as_ref());
        assert_eq!(Message::deserialize(&bytes).unwrap(), msg);
    }

    #[test]
    fn message_deserialize_rejects_bad_index() {
        let from = Pubkey::new_from_array([1; 32]);
        let to = Pubkey::new_from_array([2; 32]);
        let mut msg = compile_message(&[transfer_like(from, to)], &from, &Hash::default()).unwrap();
        msg.instructions[0].account_indices[1] = 9;
        assert!(Message::deserialize(&msg.serialize()).is_err());
    }

    #[test]
    fn message_deserialize_rejects_trailing_bytes() {
        let from = Pubkey::new_from_array([1; 32]);
        let msg = compile_message(&[transfer_like(from, from)], &from, &Hash::default()).unwrap();
        let mut bytes = msg.serialize();
        bytes.push(0);
        assert!(Message::deserialize(&bytes).is_err());
    }

    // -- Signing ------------------------------------------------------------

    #[test]
    fn signed_transaction_verifies_and_roundtrips() {
        let payer = Keypair::from_seed(&[0x42u8; 32]);
        let to = Pubkey::new_from_array([0xBB; 32]);
        let msg = compile_message(
            &[transfer_like(payer.pubkey(), to)],
            &payer.pubkey(),
            &Hash::new_from_array([0xCC; 32]),
        )
        .unwrap();

        let tx = Transaction::new_signed(msg, &[&payer]).unwrap();
        assert!(tx.verify());

        let wire = tx.to_wire();
        assert_eq!(wire[0], 0x01);
        let decoded = Transaction::from_wire(&wire).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
    }

    #[test]
    fn multi_signer_slots_follow_account_order() {
        let payer = Keypair::from_seed(&[0x01u8; 32]);
        let other = Keypair::from_seed(&[0x02u8; 32]);
        let ix = transfer_like(other.pubkey(), Pubkey::new_from_array([3; 32]));
        let msg = compile_message(&[ix], &payer.pubkey(), &Hash::default()).unwrap();

        // Signer order given to new_signed does not matter.
        let tx = Transaction::new_signed(msg, &[&other, &payer]).unwrap();
        assert_eq!(tx.signatures.len(), 2);
        assert!(tx.verify());
        let bytes = tx.message.serialize();
        assert!(tx.signatures[0].verify(&payer.pubkey(), &bytes));
        assert!(tx.signatures[1].verify(&other.pubkey(), &bytes));
    }

    #[test]
    fn missing_signer_fails() {
        let payer = Keypair::from_seed(&[0x01u8; 32]);
        let other = Keypair::from_seed(&[0x02u8; 32]);
        let ix = transfer_like(other.pubkey(), Pubkey::new_from_array([3; 32]));
        let msg = compile_message(&[ix], &payer.pubkey(), &Hash::default()).unwrap();

        let err = Transaction::new_signed(msg, &[&payer]).unwrap_err();
        assert!(err.to_string().contains("missing signer"));
    }

    #[test]
    fn unexpected_signer_fails() {
        let payer = Keypair::from_seed(&[0x01u8; 32]);
        let stranger = Keypair::from_seed(&[0x03u8; 32]);
        let ix = transfer_like(payer.pubkey(), Pubkey::new_from_array([3; 32]));
        let msg = compile_message(&[ix], &payer.pubkey(), &Hash::default()).unwrap();

        assert!(Transaction::new_signed(msg, &[&payer, &stranger]).is_err());
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let payer = Keypair::from_seed(&[0x42u8; 32]);
        let ix = transfer_like(payer.pubkey(), Pubkey::new_from_array([3; 32]));
        let msg = compile_message(&[ix], &payer.pubkey(), &Hash::default()).unwrap();
        let mut tx = Transaction::new_signed(msg, &[&payer]).unwrap();

        tx.message.instructions[0].data[0] = 9;
        assert!(!tx.verify());
    }

    #[test]
    fn from_wire_rejects_malformed_input() {
        assert!(Transaction::from_wire(&[]).is_err());
        assert!(Transaction::from_wire(&[0x01]).is_err());
        let err = Transaction::from_wire(&[0x00, 0x01, 0x00, 0x00]).unwrap_err();
        assert!(err.to_string().contains("zero signatures"));
    }
}
