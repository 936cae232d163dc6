//! Outputs locked by one HTLC, and the HTLC itself.

use bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::{AddressError, Chain, Crypto},
    protocol::{
        contract::{
            create_htlc_redeemscript, htlc_address, read_lock_data, script_hash_script_pubkey,
            LockData,
        },
        error::ContractError,
    },
};

use super::error::TradeError;

/// An unspent output paying to a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub txid: String,
    pub index: u32,
    pub amount: u64,
}

/// HTLC redeem script tagged with the chain it lives on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    crypto: Crypto,
    script: ScriptBuf,
}

impl Lock {
    pub fn new(crypto: Crypto, script: ScriptBuf) -> Self {
        Lock { crypto, script }
    }

    pub fn from_lock_data(crypto: Crypto, lock_data: &LockData) -> Self {
        Lock {
            crypto,
            script: create_htlc_redeemscript(crypto, lock_data),
        }
    }

    pub fn crypto(&self) -> Crypto {
        self.crypto
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// P2SH deposit address on `chain`.
    pub fn address(&self, chain: Chain) -> Result<String, AddressError> {
        htlc_address(self.crypto, chain, &self.script)
    }

    /// The output script deposits to [Lock::address] carry.
    pub fn script_pubkey(&self) -> ScriptBuf {
        script_hash_script_pubkey(self.crypto, &self.script)
    }

    pub fn lock_data(&self) -> Result<LockData, ContractError> {
        read_lock_data(self.crypto, &self.script)
    }
}

/// Deposits found for one side of a trade.
///
/// Outputs are only ever appended. `scan_height` is the next block a watcher has to
/// look at, so a resumed watcher continues where the last one stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsData {
    crypto: Crypto,
    lock: Option<Lock>,
    outputs: Vec<Output>,
    #[serde(default)]
    scan_height: Option<u64>,
}

impl FundsData {
    pub fn new(crypto: Crypto) -> Self {
        FundsData {
            crypto,
            lock: None,
            outputs: Vec::new(),
            scan_height: None,
        }
    }

    pub fn crypto(&self) -> Crypto {
        self.crypto
    }

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    pub(crate) fn require_lock(&self) -> Result<&Lock, TradeError> {
        self.lock.as_ref().ok_or(TradeError::Usage("funds have no lock"))
    }

    /// Install the lock. A lock is set exactly once.
    pub fn set_lock(&mut self, lock: Lock) -> Result<(), TradeError> {
        if self.lock.is_some() {
            return Err(TradeError::Usage("lock already set"));
        }
        if lock.crypto() != self.crypto {
            return Err(TradeError::MismatchCrypto {
                expected: self.crypto,
                got: lock.crypto(),
            });
        }
        self.lock = Some(lock);
        Ok(())
    }

    /// Record an output. Returns false if it was already known.
    pub fn add_funds(&mut self, output: Output) -> bool {
        if self.outputs.contains(&output) {
            return false;
        }
        log::info!(
            "Found {} {} in {}:{}",
            output.amount,
            self.crypto.ticker(),
            output.txid,
            output.index
        );
        self.outputs.push(output);
        true
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn total_amount(&self) -> u64 {
        self.outputs.iter().map(|output| output.amount).sum()
    }

    pub fn scan_height(&self) -> Option<u64> {
        self.scan_height
    }

    pub fn set_scan_height(&mut self, height: u64) {
        self.scan_height = Some(height);
    }
}
