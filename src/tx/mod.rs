//! Redeem and recovery transactions.
//!
//! Both spend every output locked by one HTLC to a single pay-to-pubkey-hash
//! output. The builder picks the chain's transaction format and sighash algorithm
//! from [CryptoParams](crate::crypto::CryptoParams) and sizes the fee.

pub mod decred;
pub mod sighash;

use std::{fmt, str::FromStr};

use bitcoin::{
    absolute::LockTime,
    consensus::encode::serialize,
    hashes::Hash,
    hex::{DisplayHex, HexToArrayError},
    transaction::Version,
    Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::{Crypto, KeyData, Preimage, PrivateKey, SighashKind},
    protocol::{
        contract::{
            create_recovery_unlocking_script, create_redeem_unlocking_script,
            pubkey_hash_script_pubkey,
        },
        error::ContractError,
    },
    trade::funds::Output,
};

use self::decred::{DecredTx, DecredTxIn, DecredTxOut, NO_BLOCK_INDEX};

/// Sizing passes before per-byte fee estimation gives up on a stable size.
const MAX_FEE_ROUNDS: usize = 8;

#[derive(Debug)]
pub enum TxError {
    Contract(ContractError),
    /// The fee consumes the whole spent amount.
    InsufficientFunds { available: u64, fee: u64 },
    InvalidTxid(HexToArrayError),
    Sighash(String),
    NoInputs,
    /// Per-byte sizing did not settle on a size.
    UnstableSize,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TxError {}

impl From<ContractError> for TxError {
    fn from(value: ContractError) -> Self {
        Self::Contract(value)
    }
}

impl From<HexToArrayError> for TxError {
    fn from(value: HexToArrayError) -> Self {
        Self::InvalidTxid(value)
    }
}

/// Miner fee of a spend, in the chain's smallest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fee {
    Fixed(u64),
    PerByte(u64),
}

/// A signed transaction of either format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tx {
    Bitcoin(Transaction),
    Decred(DecredTx),
}

impl Tx {
    pub fn txid(&self) -> String {
        match self {
            Tx::Bitcoin(tx) => tx.compute_txid().to_string(),
            Tx::Decred(tx) => tx.txid_hex(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Tx::Bitcoin(tx) => serialize(tx),
            Tx::Decred(tx) => tx.serialize(),
        }
    }

    pub fn to_hex(&self) -> String {
        self.serialize().to_lower_hex_string()
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    pub fn output_amount(&self) -> u64 {
        match self {
            Tx::Bitcoin(tx) => tx.output.iter().map(|out| out.value.to_sat()).sum(),
            Tx::Decred(tx) => tx.outputs.iter().map(|out| out.value).sum(),
        }
    }

    pub fn lock_time(&self) -> u32 {
        match self {
            Tx::Bitcoin(tx) => tx.lock_time.to_consensus_u32(),
            Tx::Decred(tx) => tx.lock_time,
        }
    }

    pub fn input_sequences(&self) -> Vec<u32> {
        match self {
            Tx::Bitcoin(tx) => tx.input.iter().map(|input| input.sequence.0).collect(),
            Tx::Decred(tx) => tx.inputs.iter().map(|input| input.sequence).collect(),
        }
    }

    /// Unlocking script of every input, in order.
    pub fn unlocking_scripts(&self) -> Vec<ScriptBuf> {
        match self {
            Tx::Bitcoin(tx) => tx.input.iter().map(|input| input.script_sig.clone()).collect(),
            Tx::Decred(tx) => tx
                .inputs
                .iter()
                .map(|input| ScriptBuf::from(input.signature_script.clone()))
                .collect(),
        }
    }
}

/// Which HTLC branch a spend takes.
#[derive(Debug, Clone, Copy)]
pub enum SpendBranch<'a> {
    /// Token branch, reveals the secret.
    Redeem(&'a Preimage),
    /// Locktime branch, valid after `locktime`.
    Recovery { locktime: u32 },
}

/// Everything needed to spend the outputs of one HTLC.
#[derive(Debug, Clone, Copy)]
pub struct Spend<'a> {
    pub outputs: &'a [Output],
    pub lock: &'a Script,
    pub key: &'a PrivateKey,
    pub branch: SpendBranch<'a>,
    pub destination: &'a KeyData,
}

impl<'a> Spend<'a> {
    fn crypto(&self) -> Crypto {
        self.key.crypto()
    }

    fn lock_time(&self) -> u32 {
        match self.branch {
            SpendBranch::Redeem(_) => 0,
            SpendBranch::Recovery { locktime } => locktime,
        }
    }

    fn sequence(&self) -> u32 {
        match self.branch {
            SpendBranch::Redeem(_) => Sequence::MAX.0,
            SpendBranch::Recovery { .. } => Sequence::ENABLE_LOCKTIME_NO_RBF.0,
        }
    }

    fn unlocking_script(&self, sig: &[u8]) -> Result<ScriptBuf, ContractError> {
        let pubkey = self.key.public_key();
        match self.branch {
            SpendBranch::Redeem(secret) => {
                create_redeem_unlocking_script(sig, &pubkey, secret, self.lock)
            }
            SpendBranch::Recovery { .. } => {
                create_recovery_unlocking_script(sig, &pubkey, self.lock)
            }
        }
    }

    /// Build and sign the spend paying `fee`.
    pub fn build_with_fee(&self, fee: u64) -> Result<Tx, TxError> {
        if self.outputs.is_empty() {
            return Err(TxError::NoInputs);
        }
        let available: u64 = self.outputs.iter().map(|output| output.amount).sum();
        if fee >= available {
            return Err(TxError::InsufficientFunds { available, fee });
        }
        match self.crypto().params().sighash {
            SighashKind::Legacy | SighashKind::ForkId => {
                self.build_bitcoin(available - fee).map(Tx::Bitcoin)
            }
            SighashKind::Decred => self.build_decred(available - fee).map(Tx::Decred),
        }
    }

    /// Build and sign the spend, sizing the fee as requested.
    ///
    /// A per-byte fee is computed from the signed size. Signature lengths vary, so
    /// the spend is rebuilt until the size the fee was computed from is the size of
    /// the returned transaction.
    pub fn build(&self, fee: Fee) -> Result<Tx, TxError> {
        let rate = match fee {
            Fee::Fixed(fee) => return self.build_with_fee(fee),
            Fee::PerByte(rate) => rate,
        };
        let mut size = self.build_with_fee(0)?.size();
        for _ in 0..MAX_FEE_ROUNDS {
            let fee = self.fee_for_size(size, rate)?;
            let tx = self.build_with_fee(fee)?;
            if tx.size() == size {
                log::debug!("Spend sized at {} bytes, fee {}", size, fee);
                return Ok(tx);
            }
            size = tx.size();
        }
        Err(TxError::UnstableSize)
    }

    fn fee_for_size(&self, size: usize, rate: u64) -> Result<u64, TxError> {
        (size as u64)
            .checked_mul(rate)
            .ok_or_else(|| TxError::InsufficientFunds {
                available: self.outputs.iter().map(|output| output.amount).sum(),
                fee: u64::MAX,
            })
    }

    fn build_bitcoin(&self, value: u64) -> Result<Transaction, TxError> {
        let params = self.crypto().params();
        let input = self
            .outputs
            .iter()
            .map(|output| {
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid: Txid::from_str(&output.txid)?,
                        vout: output.index,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence(self.sequence()),
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, TxError>>()?;
        let mut tx = Transaction {
            version: Version(params.tx_version),
            lock_time: LockTime::from_consensus(self.lock_time()),
            input,
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: pubkey_hash_script_pubkey(self.destination),
            }],
        };

        let digests = self
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| match params.sighash {
                SighashKind::ForkId => sighash::forkid_sighash(
                    &tx,
                    index,
                    self.lock,
                    output.amount,
                    params.sighash_type,
                ),
                _ => sighash::legacy_sighash(&tx, index, self.lock, params.sighash_type),
            })
            .collect::<Result<Vec<_>, TxError>>()?;

        for (input, digest) in tx.input.iter_mut().zip(digests) {
            input.script_sig = self.unlocking_script(&self.key.sign(digest))?;
        }
        Ok(tx)
    }

    fn build_decred(&self, value: u64) -> Result<DecredTx, TxError> {
        let params = self.crypto().params();
        let inputs = self
            .outputs
            .iter()
            .map(|output| {
                let txid = Txid::from_str(&output.txid)?;
                Ok(DecredTxIn {
                    prev_hash: txid.to_byte_array(),
                    prev_index: output.index,
                    tree: 0,
                    sequence: self.sequence(),
                    value_in: output.amount,
                    block_height: 0,
                    block_index: NO_BLOCK_INDEX,
                    signature_script: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, TxError>>()?;
        let mut tx = DecredTx {
            version: params.tx_version as u16,
            inputs,
            outputs: vec![DecredTxOut {
                value,
                script_version: 0,
                pk_script: pubkey_hash_script_pubkey(self.destination).into_bytes(),
            }],
            lock_time: self.lock_time(),
            expiry: 0,
        };

        let digests: Vec<[u8; 32]> = (0..tx.inputs.len())
            .map(|index| tx.signature_hash(index, self.lock.as_bytes(), params.sighash_type))
            .collect();
        for (input, digest) in tx.inputs.iter_mut().zip(digests) {
            input.signature_script = self
                .unlocking_script(&self.key.sign(digest))?
                .into_bytes();
        }
        Ok(tx)
    }
}
