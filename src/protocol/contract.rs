//! The hash-time-locked contract shared by every supported chain.
//!
//! One template, parameterized by the chain's digest opcodes, is built, disassembled
//! and strictly decoded here. The same module produces the unlocking scripts for both
//! spending branches and recovers the swap secret from a revealed redeem.

use std::fmt;

use bitcoin::{
    blockdata::{
        opcodes::{self, all, Opcode},
        script::{Builder, Instruction, PushBytes, PushBytesBuf, Script},
    },
    hashes::Hash,
    secp256k1::PublicKey,
    ScriptBuf,
};

use crate::crypto::{Chain, Crypto, KeyData, Preimage, TokenHash, DCR_OP_SHA256};

use super::error::ContractError;

/// CLTV operands are script numbers of at most five bytes.
const MAX_LOCKTIME_NUM_LEN: usize = 5;

/// The data holes of an HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockData {
    /// Unix time after which the recovery branch can be used.
    pub locktime: u32,
    pub token_hash: TokenHash,
    pub recovery_key_hash: KeyData,
    pub redeem_key_hash: KeyData,
}

/// One instruction of a disassembled script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptToken {
    Op(Opcode),
    Data(Vec<u8>),
}

impl ScriptToken {
    /// Renders the token with the opcode names of `crypto`'s script dialect.
    pub fn display(&self, crypto: Crypto) -> String {
        match self {
            ScriptToken::Op(op) if crypto == Crypto::Decred && *op == DCR_OP_SHA256 => {
                "OP_SHA256".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ScriptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptToken::Op(op) => write!(f, "{}", op),
            ScriptToken::Data(data) if data.is_empty() => write!(f, "OP_0"),
            ScriptToken::Data(data) => {
                for byte in data {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Op(Opcode),
    LockTime,
    Hash,
}

fn htlc_template(crypto: Crypto) -> Vec<Slot> {
    let mut template = vec![
        Slot::Op(all::OP_IF),
        Slot::LockTime,
        Slot::Op(all::OP_CLTV),
        Slot::Op(all::OP_DROP),
        Slot::Op(all::OP_DUP),
        Slot::Op(all::OP_HASH160),
        Slot::Hash,
        Slot::Op(all::OP_EQUALVERIFY),
        Slot::Op(all::OP_CHECKSIG),
        Slot::Op(all::OP_ELSE),
    ];
    template.extend(
        crypto
            .params()
            .token_digest_ops
            .iter()
            .map(|op| Slot::Op(*op)),
    );
    template.extend([
        Slot::Hash,
        Slot::Op(all::OP_EQUALVERIFY),
        Slot::Op(all::OP_DUP),
        Slot::Op(all::OP_HASH160),
        Slot::Hash,
        Slot::Op(all::OP_EQUALVERIFY),
        Slot::Op(all::OP_CHECKSIG),
        Slot::Op(all::OP_ENDIF),
    ]);
    template
}

/// Number of instructions of the HTLC on `crypto`.
pub fn htlc_instruction_count(crypto: Crypto) -> usize {
    htlc_template(crypto).len()
}

#[rustfmt::skip]
pub fn create_htlc_redeemscript(crypto: Crypto, lock_data: &LockData) -> ScriptBuf {
    /*
    opcodes                      | stack after execution
                                 |
                                 | <sig> <pubkey> (<secret> 0 | 1)
    OP_IF                        | <sig> <pubkey>
        locktime                 | <sig> <pubkey> <locktime>
        OP_CHECKLOCKTIMEVERIFY   | <sig> <pubkey> <locktime>
        OP_DROP                  | <sig> <pubkey>
        OP_DUP OP_HASH160        | <sig> <pubkey> <H(pubkey)>
        recovery_key_hash        | <sig> <pubkey> <H(pubkey)> <recovery_key_hash>
        OP_EQUALVERIFY           | <sig> <pubkey>
        OP_CHECKSIG              | true|false
    OP_ELSE                      | <sig> <pubkey> <secret>
        digest ops               | <sig> <pubkey> <D(secret)>
        token_hash               | <sig> <pubkey> <D(secret)> <token_hash>
        OP_EQUALVERIFY           | <sig> <pubkey>
        OP_DUP OP_HASH160        | <sig> <pubkey> <H(pubkey)>
        redeem_key_hash          | <sig> <pubkey> <H(pubkey)> <redeem_key_hash>
        OP_EQUALVERIFY           | <sig> <pubkey>
        OP_CHECKSIG              | true|false
    OP_ENDIF                     |
    */
    let mut builder = Builder::new()
        .push_opcode(all::OP_IF)
            .push_int(lock_data.locktime as i64)
            .push_opcode(all::OP_CLTV)
            .push_opcode(all::OP_DROP)
            .push_opcode(all::OP_DUP)
            .push_opcode(all::OP_HASH160)
            .push_slice(lock_data.recovery_key_hash.to_byte_array())
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_CHECKSIG)
        .push_opcode(all::OP_ELSE);
    for op in crypto.params().token_digest_ops {
        builder = builder.push_opcode(*op);
    }
    builder
            .push_slice(lock_data.token_hash.to_byte_array())
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_DUP)
            .push_opcode(all::OP_HASH160)
            .push_slice(lock_data.redeem_key_hash.to_byte_array())
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_CHECKSIG)
        .push_opcode(all::OP_ENDIF)
        .into_script()
}

/// Split a script into its instructions. Non minimal pushes are rejected.
pub fn disassemble(script: &Script) -> Result<Vec<ScriptToken>, ContractError> {
    script
        .instructions_minimal()
        .map(|instruction| {
            Ok(match instruction? {
                Instruction::Op(op) => ScriptToken::Op(op),
                Instruction::PushBytes(data) => ScriptToken::Data(data.as_bytes().to_vec()),
            })
        })
        .collect()
}

/// Strictly match `script` against the HTLC template of `crypto` and read its data holes.
pub fn read_lock_data(crypto: Crypto, script: &Script) -> Result<LockData, ContractError> {
    let tokens = disassemble(script)?;
    let template = htlc_template(crypto);
    if tokens.len() != template.len() {
        return Err(ContractError::InstructionCount {
            expected: template.len(),
            got: tokens.len(),
        });
    }

    let mut locktime = None;
    let mut hashes = Vec::with_capacity(3);
    for (position, (slot, token)) in template.iter().zip(tokens.iter()).enumerate() {
        match (slot, token) {
            (Slot::Op(expected), ScriptToken::Op(op)) if expected == op => {}
            (Slot::LockTime, token) => locktime = Some(read_locktime(token, position)?),
            (Slot::Hash, ScriptToken::Data(data)) if data.len() == 20 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(data);
                hashes.push(hash);
            }
            _ => return Err(ContractError::TemplateMismatch { position }),
        }
    }

    match (locktime, hashes.as_slice()) {
        (Some(locktime), [recovery, token, redeem]) => Ok(LockData {
            locktime,
            token_hash: TokenHash::from_byte_array(*token),
            recovery_key_hash: KeyData::from_byte_array(*recovery),
            redeem_key_hash: KeyData::from_byte_array(*redeem),
        }),
        _ => Err(ContractError::Protocol("htlc template is missing a data hole")),
    }
}

fn read_locktime(token: &ScriptToken, position: usize) -> Result<u32, ContractError> {
    let value = match token {
        ScriptToken::Data(bytes) => read_script_num(bytes)?,
        ScriptToken::Op(op) => match op.classify(opcodes::ClassifyContext::Legacy) {
            opcodes::Class::PushNum(n) => n as i64,
            _ => return Err(ContractError::TemplateMismatch { position }),
        },
    };
    u32::try_from(value).map_err(|_| ContractError::InvalidLockTime)
}

/// Decode a minimally encoded little-endian sign-magnitude script number.
fn read_script_num(bytes: &[u8]) -> Result<i64, ContractError> {
    let Some((last, _)) = bytes.split_last() else {
        return Ok(0);
    };
    if bytes.len() > MAX_LOCKTIME_NUM_LEN {
        return Err(ContractError::InvalidLockTime);
    }
    if last & 0x7f == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
        return Err(ContractError::InvalidLockTime);
    }

    let mut value = bytes
        .iter()
        .enumerate()
        .fold(0i64, |acc, (i, byte)| acc | (*byte as i64) << (8 * i));
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -value;
    }
    Ok(value)
}

/// `<sig> <pubkey> <secret> 0 <lock>`, spending through the token branch.
pub fn create_redeem_unlocking_script(
    sig: &[u8],
    pubkey: &PublicKey,
    secret: &Preimage,
    lock: &Script,
) -> Result<ScriptBuf, ContractError> {
    Ok(Builder::new()
        .push_slice(PushBytesBuf::try_from(sig.to_vec())?)
        .push_slice(pubkey.serialize())
        .push_slice(secret.to_byte_array())
        .push_int(0)
        .push_slice(<&PushBytes>::try_from(lock.as_bytes())?)
        .into_script())
}

/// `<sig> <pubkey> 1 <lock>`, spending through the locktime branch.
pub fn create_recovery_unlocking_script(
    sig: &[u8],
    pubkey: &PublicKey,
    lock: &Script,
) -> Result<ScriptBuf, ContractError> {
    Ok(Builder::new()
        .push_slice(PushBytesBuf::try_from(sig.to_vec())?)
        .push_slice(pubkey.serialize())
        .push_int(1)
        .push_slice(<&PushBytes>::try_from(lock.as_bytes())?)
        .into_script())
}

/// Recover the secret from the unlocking script of an input spending `lock`.
///
/// Any push encoding a node accepts is read. The last push must be `lock` and the
/// one before it selects the branch. Returns `None` for a spend through the recovery
/// branch.
pub fn extract_secret(
    unlocking: &Script,
    lock: &Script,
) -> Result<Option<Preimage>, ContractError> {
    let mut pushes = Vec::new();
    for instruction in unlocking.instructions() {
        pushes.push(match instruction? {
            Instruction::PushBytes(data) => data.as_bytes().to_vec(),
            Instruction::Op(op) => push_num_bytes(op)
                .ok_or(ContractError::Protocol("unlocking script is not push only"))?,
        });
    }
    let (script, rest) = pushes
        .split_last()
        .ok_or(ContractError::Protocol("empty unlocking script"))?;
    if script.as_slice() != lock.as_bytes() {
        return Err(ContractError::Protocol("unlocking script carries another lock"));
    }
    match rest {
        [.., selector] if is_true(selector) => Ok(None),
        [.., secret, _] => Preimage::from_slice(secret)
            .map(Some)
            .ok_or(ContractError::Protocol("secret is not 32 bytes")),
        _ => Err(ContractError::Protocol("unlocking script is too short")),
    }
}

/// Data pushed by the small number opcodes.
fn push_num_bytes(op: Opcode) -> Option<Vec<u8>> {
    let code = op.to_u8();
    if code == all::OP_PUSHNUM_NEG1.to_u8() {
        Some(vec![0x81])
    } else if (all::OP_PUSHNUM_1.to_u8()..=all::OP_PUSHNUM_16.to_u8()).contains(&code) {
        Some(vec![code - all::OP_PUSHNUM_1.to_u8() + 1])
    } else {
        None
    }
}

/// Script truthiness: any non zero byte, negative zero excluded.
fn is_true(data: &[u8]) -> bool {
    match data.split_last() {
        Some((last, init)) => init.iter().any(|b| *b != 0) || (*last != 0 && *last != 0x80),
        None => false,
    }
}

/// `OP_HASH160 <H(script)> OP_EQUAL`, with the chain's own `H`.
pub fn script_hash_script_pubkey(crypto: Crypto, script: &Script) -> ScriptBuf {
    Builder::new()
        .push_opcode(all::OP_HASH160)
        .push_slice(crypto.key_hash(script.as_bytes()))
        .push_opcode(all::OP_EQUAL)
        .into_script()
}

pub fn pubkey_hash_script_pubkey(key_data: &KeyData) -> ScriptBuf {
    Builder::new()
        .push_opcode(all::OP_DUP)
        .push_opcode(all::OP_HASH160)
        .push_slice(key_data.to_byte_array())
        .push_opcode(all::OP_EQUALVERIFY)
        .push_opcode(all::OP_CHECKSIG)
        .into_script()
}

/// Pay-to-script-hash deposit address of `script` on `chain`.
pub fn htlc_address(
    crypto: Crypto,
    chain: Chain,
    script: &Script,
) -> Result<String, crate::crypto::AddressError> {
    crypto.script_hash_address(chain, &crypto.key_hash(script.as_bytes()))
}
