//! Observing chains for HTLC deposits and redeems.
//!
//! Watchers walk blocks forward from the funds' scan height and record their progress in
//! the [FundsData], so a resumed trade neither rescans old blocks nor records an output
//! twice. Waiting for the next block backs off exponentially and can be interrupted.

pub mod rpc;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use bitcoin::ScriptBuf;

use crate::{
    crypto::{Preimage, TokenHash},
    protocol::contract::extract_secret,
    trade::{FundsData, Output, TradeError},
};

/// Errors from a chain backend.
#[derive(Debug)]
pub enum ClientError {
    Rpc(bitcoind::bitcoincore_rpc::Error),
    /// No block at the requested height yet.
    NoBlock,
    Parse(String),
    /// The node refused a transaction.
    Rejected(String),
    IO(std::io::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_txid: String,
    pub prev_index: u32,
    pub unlock_script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub hash: String,
    pub height: u64,
    pub transactions: Vec<ChainTransaction>,
    pub prev_hash: Option<String>,
    pub next_hash: Option<String>,
}

/// Read access to a chain plus the wallet calls a trade needs to fund and publish.
///
/// Amounts are in the chain's smallest unit. Transaction ids are hex in display order.
pub trait ChainClient: Send + Sync {
    /// Height of the best block.
    fn block_count(&self) -> Result<u64, ClientError>;
    /// Hash of the block at `height`, [ClientError::NoBlock] above the tip.
    fn block_hash(&self, height: u64) -> Result<String, ClientError>;
    fn block(&self, hash: &str) -> Result<ChainBlock, ClientError>;
    fn transaction(&self, txid: &str) -> Result<ChainTransaction, ClientError>;
    fn balance(&self) -> Result<u64, ClientError>;
    fn new_address(&self) -> Result<String, ClientError>;
    /// Pay `amount` from the wallet to `address`, returning the txid.
    fn send_to_address(&self, address: &str, amount: u64) -> Result<String, ClientError>;
    fn send_raw_transaction(&self, tx: &[u8]) -> Result<String, ClientError>;
    fn generate_to_address(&self, blocks: u64, address: &str) -> Result<Vec<String>, ClientError>;
}

/// Polling behaviour of the watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub min_poll_delay: Duration,
    pub max_poll_delay: Duration,
    /// Blocks below the tip a fresh watch starts from.
    pub lookback: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            min_poll_delay: Duration::from_secs(1),
            max_poll_delay: Duration::from_secs(30),
            lookback: 100,
        }
    }
}

/// Doubling delay, capped at the configured maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &WatchConfig) -> Self {
        Backoff {
            delay: config.min_poll_delay,
            min: config.min_poll_delay,
            max: config.max_poll_delay,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.delay = self.min;
    }
}

/// Cloneable flag stopping every wait sharing it.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless triggered first. Returns false when interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watched<T> {
    Found(T),
    Interrupted,
}

/// Walk blocks from the funds' scan height, calling `visit` on every transaction until
/// it returns a value.
///
/// The scan height is advanced after each fully visited block.
fn scan_blocks<T, F>(
    client: &dyn ChainClient,
    funds: &mut FundsData,
    config: &WatchConfig,
    interrupt: &Interrupt,
    mut visit: F,
) -> Result<Watched<T>, TradeError>
where
    F: FnMut(&ChainTransaction, &mut FundsData) -> Result<Option<T>, TradeError>,
{
    let mut height = match funds.scan_height() {
        Some(height) => height,
        None => {
            let start = client.block_count()?.saturating_sub(config.lookback);
            funds.set_scan_height(start);
            start
        }
    };
    let mut backoff = Backoff::new(config);
    loop {
        if interrupt.is_triggered() {
            return Ok(Watched::Interrupted);
        }
        let hash = match client.block_hash(height) {
            Ok(hash) => hash,
            Err(ClientError::NoBlock) => {
                let delay = backoff.next_delay();
                log::debug!("No block at height {} yet, waiting {:?}", height, delay);
                if !interrupt.sleep(delay) {
                    return Ok(Watched::Interrupted);
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        backoff.reset();
        let block = client.block(&hash)?;
        for tx in &block.transactions {
            if let Some(found) = visit(tx, funds)? {
                return Ok(Watched::Found(found));
            }
        }
        height += 1;
        funds.set_scan_height(height);
    }
}

/// Wait until outputs paying to the funds' lock add up to `target`, recording them.
///
/// Returns the total amount locked.
pub fn watch_deposits(
    client: &dyn ChainClient,
    funds: &mut FundsData,
    target: u64,
    config: &WatchConfig,
    interrupt: &Interrupt,
) -> Result<Watched<u64>, TradeError> {
    if funds.total_amount() >= target {
        return Ok(Watched::Found(funds.total_amount()));
    }
    let script_pubkey = funds.require_lock()?.script_pubkey();
    log::info!(
        "Watching {} for {} locked to {}",
        funds.crypto(),
        target,
        script_pubkey
    );
    scan_blocks(client, funds, config, interrupt, |tx, funds| {
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.script != script_pubkey {
                continue;
            }
            funds.add_funds(Output {
                txid: tx.txid.clone(),
                index: index as u32,
                amount: output.amount,
            });
        }
        if funds.total_amount() >= target {
            Ok(Some(funds.total_amount()))
        } else {
            Ok(None)
        }
    })
}

/// Wait for a spend of the funds' outputs through the token branch and return the
/// revealed token.
///
/// A spend through the recovery branch ends the wait with [TradeError::FundsRecovered].
pub fn watch_redeem(
    client: &dyn ChainClient,
    funds: &mut FundsData,
    token_hash: &TokenHash,
    config: &WatchConfig,
    interrupt: &Interrupt,
) -> Result<Watched<Preimage>, TradeError> {
    let lock = funds.require_lock()?.script().to_owned();
    if funds.outputs().is_empty() {
        return Err(TradeError::Usage("no locked outputs to watch"));
    }
    log::info!("Watching {} for a redeem of {}", funds.crypto(), token_hash);
    scan_blocks(client, funds, config, interrupt, |tx, funds| {
        for input in &tx.inputs {
            let spends_lock = funds
                .outputs()
                .iter()
                .any(|o| o.txid == input.prev_txid && o.index == input.prev_index);
            if !spends_lock {
                continue;
            }
            match extract_secret(&input.unlock_script, &lock) {
                Ok(Some(secret)) if secret.token_hash() == *token_hash => {
                    log::info!("Token revealed in {}", tx.txid);
                    return Ok(Some(secret));
                }
                Ok(Some(_)) => log::warn!("Spend {} carries a secret for another hash", tx.txid),
                Ok(None) => {
                    log::warn!("Lock spent through recovery in {}", tx.txid);
                    return Err(TradeError::FundsRecovered);
                }
                Err(e) => log::warn!("Skipping unreadable spend in {}: {:?}", tx.txid, e),
            }
        }
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        crypto::{Crypto, KeyData, PrivateKey},
        protocol::contract::{
            create_recovery_unlocking_script, create_redeem_unlocking_script, LockData,
        },
        trade::Lock,
    };

    #[derive(Default)]
    struct Blocks(Mutex<Vec<Vec<ChainTransaction>>>);

    impl Blocks {
        fn push(&self, txs: Vec<ChainTransaction>) {
            self.0.lock().unwrap().push(txs);
        }
    }

    impl ChainClient for Blocks {
        fn block_count(&self) -> Result<u64, ClientError> {
            Ok(self.0.lock().unwrap().len() as u64 - 1)
        }
        fn block_hash(&self, height: u64) -> Result<String, ClientError> {
            if height < self.0.lock().unwrap().len() as u64 {
                Ok(height.to_string())
            } else {
                Err(ClientError::NoBlock)
            }
        }
        fn block(&self, hash: &str) -> Result<ChainBlock, ClientError> {
            let height: u64 = hash.parse().map_err(|_| ClientError::NoBlock)?;
            Ok(ChainBlock {
                hash: hash.to_string(),
                height,
                transactions: self.0.lock().unwrap()[height as usize].clone(),
                prev_hash: None,
                next_hash: None,
            })
        }
        fn transaction(&self, _txid: &str) -> Result<ChainTransaction, ClientError> {
            Err(ClientError::Parse("unused".to_string()))
        }
        fn balance(&self) -> Result<u64, ClientError> {
            Ok(0)
        }
        fn new_address(&self) -> Result<String, ClientError> {
            Err(ClientError::Parse("unused".to_string()))
        }
        fn send_to_address(&self, _: &str, _: u64) -> Result<String, ClientError> {
            Err(ClientError::Parse("unused".to_string()))
        }
        fn send_raw_transaction(&self, _: &[u8]) -> Result<String, ClientError> {
            Err(ClientError::Parse("unused".to_string()))
        }
        fn generate_to_address(&self, _: u64, _: &str) -> Result<Vec<String>, ClientError> {
            Err(ClientError::Parse("unused".to_string()))
        }
    }

    fn fast() -> WatchConfig {
        WatchConfig {
            min_poll_delay: Duration::from_millis(5),
            max_poll_delay: Duration::from_millis(20),
            lookback: 2,
        }
    }

    fn locked_funds(secret: &Preimage, key: &PrivateKey) -> FundsData {
        let mut funds = FundsData::new(Crypto::Litecoin);
        funds
            .set_lock(Lock::from_lock_data(
                Crypto::Litecoin,
                &LockData {
                    locktime: 500_000,
                    token_hash: secret.token_hash(),
                    recovery_key_hash: KeyData::from_byte_array([1; 20]),
                    redeem_key_hash: key.key_data(),
                },
            ))
            .unwrap();
        funds
    }

    fn deposit(txid: &str, funds: &FundsData, amount: u64) -> ChainTransaction {
        ChainTransaction {
            txid: txid.to_string(),
            inputs: vec![],
            outputs: vec![
                TxOutput {
                    amount: 1,
                    script: ScriptBuf::new(),
                },
                TxOutput {
                    amount,
                    script: funds.lock().unwrap().script_pubkey(),
                },
            ],
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(&WatchConfig::default());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_deposits_resume_without_duplicates() {
        let secret = Preimage::from_byte_array([3; 32]);
        let key = PrivateKey::generate(Crypto::Litecoin);
        let mut funds = locked_funds(&secret, &key);
        let chain = Blocks::default();
        for _ in 0..5 {
            chain.push(vec![]);
        }
        chain.push(vec![deposit("aa", &funds, 400)]);

        // Scan starts two blocks under the tip.
        let interrupt = Interrupt::new();
        let found = watch_deposits(&chain, &mut funds, 400, &fast(), &interrupt).unwrap();
        assert_eq!(found, Watched::Found(400));
        assert_eq!(funds.scan_height(), Some(5));
        assert_eq!(funds.outputs()[0].index, 1);

        // Rescanning the same block does not double count.
        chain.push(vec![deposit("bb", &funds, 600)]);
        let found = watch_deposits(&chain, &mut funds, 1_000, &fast(), &interrupt).unwrap();
        assert_eq!(found, Watched::Found(1_000));
        assert_eq!(funds.outputs().len(), 2);
        assert_eq!(funds.total_amount(), 1_000);
    }

    #[test]
    fn test_interrupt_ends_wait() {
        let secret = Preimage::from_byte_array([3; 32]);
        let key = PrivateKey::generate(Crypto::Litecoin);
        let mut funds = locked_funds(&secret, &key);
        let chain = Blocks::default();
        chain.push(vec![]);

        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            trigger.trigger();
        });
        let watched = watch_deposits(&chain, &mut funds, 1, &fast(), &interrupt).unwrap();
        handle.join().unwrap();
        assert_eq!(watched, Watched::Interrupted);
        assert_eq!(funds.scan_height(), Some(1));
        assert!(!interrupt.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn test_redeem_reveals_token() {
        let secret = Preimage::from_byte_array([3; 32]);
        let key = PrivateKey::generate(Crypto::Litecoin);
        let mut funds = locked_funds(&secret, &key);
        funds.add_funds(Output {
            txid: "aa".to_string(),
            index: 1,
            amount: 400,
        });
        funds.set_scan_height(0);
        let lock = funds.lock().unwrap().script().to_owned();
        let unlock =
            create_redeem_unlocking_script(&[0x30; 71], &key.public_key(), &secret, &lock).unwrap();
        let chain = Blocks::default();
        chain.push(vec![ChainTransaction {
            txid: "cc".to_string(),
            inputs: vec![
                TxInput {
                    prev_txid: "aa".to_string(),
                    prev_index: 0,
                    unlock_script: ScriptBuf::new(),
                },
                TxInput {
                    prev_txid: "aa".to_string(),
                    prev_index: 1,
                    unlock_script: unlock,
                },
            ],
            outputs: vec![],
        }]);

        let token_hash = secret.token_hash();
        let watched = watch_redeem(&chain, &mut funds, &token_hash, &fast(), &Interrupt::new());
        assert_eq!(watched.unwrap(), Watched::Found(secret));
    }

    #[test]
    fn test_recovery_spend_ends_redeem_wait() {
        let secret = Preimage::from_byte_array([3; 32]);
        let key = PrivateKey::generate(Crypto::Litecoin);
        let mut funds = locked_funds(&secret, &key);
        funds.add_funds(Output {
            txid: "aa".to_string(),
            index: 1,
            amount: 400,
        });
        funds.set_scan_height(0);
        let lock = funds.lock().unwrap().script().to_owned();
        let chain = Blocks::default();
        chain.push(vec![ChainTransaction {
            txid: "dd".to_string(),
            inputs: vec![TxInput {
                prev_txid: "aa".to_string(),
                prev_index: 1,
                unlock_script: create_recovery_unlocking_script(
                    &[0x30; 71],
                    &key.public_key(),
                    &lock,
                )
                .unwrap(),
            }],
            outputs: vec![],
        }]);

        assert!(matches!(
            watch_redeem(&chain, &mut funds, &secret.token_hash(), &fast(), &Interrupt::new()),
            Err(TradeError::FundsRecovered)
        ));
    }

    #[test]
    fn test_unreadable_spend_is_skipped() {
        let secret = Preimage::from_byte_array([3; 32]);
        let key = PrivateKey::generate(Crypto::Litecoin);
        let mut funds = locked_funds(&secret, &key);
        funds.add_funds(Output {
            txid: "aa".to_string(),
            index: 1,
            amount: 400,
        });
        funds.set_scan_height(0);
        let lock = funds.lock().unwrap().script().to_owned();

        // The secret behind a PUSHDATA1, which a minimal parse refuses.
        let mut padded = vec![0x4c, 71];
        padded.extend_from_slice(&[0x30; 71]);
        padded.extend_from_slice(&[0x21]);
        padded.extend_from_slice(&key.public_key().serialize());
        padded.extend_from_slice(&[0x4c, 32]);
        padded.extend_from_slice(secret.as_bytes());
        padded.extend_from_slice(&[0x00, 0x4c, lock.len() as u8]);
        padded.extend_from_slice(lock.as_bytes());

        let spend = |txid: &str, unlock_script: ScriptBuf| ChainTransaction {
            txid: txid.to_string(),
            inputs: vec![TxInput {
                prev_txid: "aa".to_string(),
                prev_index: 1,
                unlock_script,
            }],
            outputs: vec![],
        };
        let chain = Blocks::default();
        chain.push(vec![spend("ee", ScriptBuf::from_bytes(vec![0x4c, 0x05, 0x01]))]);
        chain.push(vec![spend("ff", ScriptBuf::from_bytes(padded))]);

        let token_hash = secret.token_hash();
        let watched = watch_redeem(&chain, &mut funds, &token_hash, &fast(), &Interrupt::new());
        assert_eq!(watched.unwrap(), Watched::Found(secret));
        assert_eq!(funds.scan_height(), Some(1));
    }
}
