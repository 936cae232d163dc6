//! A Framework to write functional tests for atomic swaps.
//!
//! [MockChain] is an in-memory chain implementing [ChainClient]. Every accepted
//! transaction is mined into its own block, so watchers see it on their next poll. It
//! evaluates the HTLC spends a swap makes: inputs must be unspent, the token and key
//! must match the lock, locktime spends wait for the chain clock, and legacy
//! signatures must verify.
//!
//! With the `integration-test` feature, [BitcoindNode] spawns a regtest bitcoind through
//! the [bitcoind] crate. Point `BITCOIND_EXE` at a bitcoind binary to run those tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use atomicswap::{
    crypto::{hash160, Chain, Crypto, KeyData, SighashKind},
    protocol::contract::{read_lock_data, script_hash_script_pubkey},
    utill::{setup_logger, unix_time},
    watch::{ChainBlock, ChainClient, ChainTransaction, ClientError, WatchConfig},
};
use bitcoin::{
    absolute::LockTime,
    consensus::encode::deserialize,
    hashes::Hash,
    script::Instruction,
    secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1},
    sighash::SighashCache,
    transaction::Version,
    Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

/// Locktimes at or above this are unix times, below are heights.
const LOCKTIME_THRESHOLD: u32 = 500_000_000;

struct ChainState {
    blocks: Vec<Vec<ChainTransaction>>,
    transactions: HashMap<String, ChainTransaction>,
    unspent: HashSet<(String, u32)>,
    time: u64,
    balance: u64,
    nonce: u32,
}

/// In-memory chain of one crypto with a funded wallet.
pub struct MockChain {
    crypto: Crypto,
    chain: Chain,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(crypto: Crypto, balance: u64) -> Self {
        setup_logger(log::LevelFilter::Info, None);
        MockChain {
            crypto,
            chain: Chain::Regtest,
            state: Mutex::new(ChainState {
                blocks: vec![vec![]],
                transactions: HashMap::new(),
                unspent: HashSet::new(),
                time: unix_time(),
                balance,
                nonce: 0,
            }),
        }
    }

    pub fn crypto(&self) -> Crypto {
        self.crypto
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The clock locktimes are checked against.
    pub fn time(&self) -> u64 {
        self.state.lock().unwrap().time
    }

    pub fn set_time(&self, time: u64) {
        self.state.lock().unwrap().time = time;
    }

    /// Confirmed amount paid to `script`, spent or not.
    pub fn paid_to(&self, script: &Script) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .iter()
            .flatten()
            .flat_map(|tx| tx.outputs.iter())
            .filter(|output| output.script.as_script() == script)
            .map(|output| output.amount)
            .sum()
    }

    pub fn is_spent(&self, txid: &str, index: u32) -> bool {
        let state = self.state.lock().unwrap();
        state.transactions.contains_key(txid) && !state.unspent.contains(&(txid.to_string(), index))
    }

    /// Add an empty block.
    pub fn mine(&self) {
        self.state.lock().unwrap().blocks.push(vec![]);
    }

    fn confirm(state: &mut ChainState, tx: &Transaction) -> String {
        let chain_tx = ChainTransaction::from(tx);
        for input in &chain_tx.inputs {
            state
                .unspent
                .remove(&(input.prev_txid.clone(), input.prev_index));
        }
        for index in 0..chain_tx.outputs.len() {
            state.unspent.insert((chain_tx.txid.clone(), index as u32));
        }
        let txid = chain_tx.txid.clone();
        state.transactions.insert(txid.clone(), chain_tx.clone());
        state.blocks.push(vec![chain_tx]);
        txid
    }

    fn check_final(state: &ChainState, tx: &Transaction) -> Result<(), ClientError> {
        let locktime = tx.lock_time.to_consensus_u32();
        if locktime == 0 || tx.input.iter().all(|input| input.sequence == Sequence::MAX) {
            return Ok(());
        }
        let reference = if locktime >= LOCKTIME_THRESHOLD {
            state.time
        } else {
            state.blocks.len() as u64
        };
        if locktime as u64 >= reference {
            return Err(ClientError::Rejected("non-final".to_string()));
        }
        Ok(())
    }

    /// Evaluate an HTLC spend: `<sig> <pubkey> <secret> 0 <lock>` or `<sig> <pubkey> 1 <lock>`.
    ///
    /// The lock must be what the spent output pays to, the token must open it, the key
    /// must be the branch's key and the signature must commit to the lock.
    fn check_input(
        &self,
        state: &ChainState,
        tx: &Transaction,
        index: usize,
    ) -> Result<(), ClientError> {
        let input = &tx.input[index];
        let prev_txid = input.previous_output.txid.to_string();
        let prev_index = input.previous_output.vout;
        if !state.unspent.contains(&(prev_txid.clone(), prev_index)) {
            return Err(ClientError::Rejected("missing-inputs".to_string()));
        }
        let pushes = input
            .script_sig
            .instructions()
            .filter_map(|instruction| match instruction {
                Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
                _ => None,
            })
            .collect::<Vec<_>>();
        let (sig, pubkey, secret, lock) = match pushes.as_slice() {
            [sig, pubkey, secret, branch, lock] if branch.is_empty() => {
                (sig, pubkey, Some(secret), lock)
            }
            [sig, pubkey, lock] => (sig, pubkey, None, lock),
            _ => return Err(ClientError::Rejected("unexpected script-sig".to_string())),
        };
        let lock = Script::from_bytes(lock);
        let prev_output = &state.transactions[&prev_txid].outputs[prev_index as usize];
        if prev_output.script != script_hash_script_pubkey(self.crypto, lock) {
            return Err(ClientError::Rejected("script hash mismatch".to_string()));
        }

        let lock_data = read_lock_data(self.crypto, lock)
            .map_err(|e| ClientError::Rejected(format!("not a lock: {:?}", e)))?;
        let key_hash = match secret {
            Some(secret) => {
                if hash160(secret) != lock_data.token_hash.to_byte_array() {
                    return Err(ClientError::Rejected("bad token".to_string()));
                }
                lock_data.redeem_key_hash
            }
            None => {
                if tx.lock_time.to_consensus_u32() < lock_data.locktime
                    || input.sequence == Sequence::MAX
                {
                    return Err(ClientError::Rejected(
                        "locktime requirement not satisfied".to_string(),
                    ));
                }
                lock_data.recovery_key_hash
            }
        };
        if self.crypto.key_hash(pubkey) != key_hash.to_byte_array() {
            return Err(ClientError::Rejected("key hash mismatch".to_string()));
        }

        if self.crypto.params().sighash != SighashKind::Legacy {
            return Ok(());
        }
        let (hash_type, der) = sig
            .split_last()
            .ok_or_else(|| ClientError::Rejected("empty signature".to_string()))?;
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(index, lock, *hash_type as u32)
            .map_err(|e| ClientError::Rejected(e.to_string()))?;
        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(sighash.to_byte_array());
        let signature =
            Signature::from_der(der).map_err(|e| ClientError::Rejected(e.to_string()))?;
        let pubkey =
            PublicKey::from_slice(pubkey).map_err(|e| ClientError::Rejected(e.to_string()))?;
        secp.verify_ecdsa(&message, &signature, &pubkey)
            .map_err(|_| ClientError::Rejected("bad signature".to_string()))
    }
}

impl ChainClient for MockChain {
    fn block_count(&self) -> Result<u64, ClientError> {
        Ok(self.state.lock().unwrap().blocks.len() as u64 - 1)
    }

    fn block_hash(&self, height: u64) -> Result<String, ClientError> {
        if height < self.state.lock().unwrap().blocks.len() as u64 {
            Ok(format!("{:064x}", height))
        } else {
            Err(ClientError::NoBlock)
        }
    }

    fn block(&self, hash: &str) -> Result<ChainBlock, ClientError> {
        let height =
            u64::from_str_radix(hash, 16).map_err(|e| ClientError::Parse(e.to_string()))?;
        let state = self.state.lock().unwrap();
        let transactions = state
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or(ClientError::NoBlock)?;
        Ok(ChainBlock {
            hash: hash.to_string(),
            height,
            transactions,
            prev_hash: height.checked_sub(1).map(|h| format!("{:064x}", h)),
            next_hash: ((height as usize + 1) < state.blocks.len())
                .then(|| format!("{:064x}", height + 1)),
        })
    }

    fn transaction(&self, txid: &str) -> Result<ChainTransaction, ClientError> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ClientError::Parse(format!("unknown transaction {}", txid)))
    }

    fn balance(&self) -> Result<u64, ClientError> {
        Ok(self.state.lock().unwrap().balance)
    }

    fn new_address(&self) -> Result<String, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.nonce += 1;
        let mut hash = [0u8; 20];
        hash[..4].copy_from_slice(&state.nonce.to_be_bytes());
        self.crypto
            .pubkey_hash_address(self.chain, &KeyData::from_byte_array(hash))
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    fn send_to_address(&self, address: &str, amount: u64) -> Result<String, ClientError> {
        let script_pubkey = self
            .crypto
            .address_script_pubkey(self.chain, address)
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        let mut state = self.state.lock().unwrap();
        if amount > state.balance {
            return Err(ClientError::Rejected("insufficient funds".to_string()));
        }
        state.balance -= amount;
        state.nonce += 1;
        let mut funding = [0xf0u8; 32];
        funding[..4].copy_from_slice(&state.nonce.to_be_bytes());
        let tx = Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array(funding),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(amount),
                script_pubkey,
            }],
        };
        Ok(Self::confirm(&mut state, &tx))
    }

    fn send_raw_transaction(&self, tx: &[u8]) -> Result<String, ClientError> {
        if self.crypto.params().sighash == SighashKind::Decred {
            return Err(ClientError::Rejected("decred transactions unsupported".to_string()));
        }
        let tx: Transaction = deserialize(tx).map_err(|e| ClientError::Parse(e.to_string()))?;
        let mut state = self.state.lock().unwrap();
        Self::check_final(&state, &tx)?;
        for index in 0..tx.input.len() {
            self.check_input(&state, &tx, index)?;
        }
        Ok(Self::confirm(&mut state, &tx))
    }

    fn generate_to_address(&self, blocks: u64, _address: &str) -> Result<Vec<String>, ClientError> {
        let mut hashes = Vec::new();
        for _ in 0..blocks {
            self.mine();
            hashes.push(self.block_hash(self.block_count()?)?);
        }
        Ok(hashes)
    }
}

/// Watchers polling fast enough for tests.
pub fn fast_watch() -> WatchConfig {
    WatchConfig {
        min_poll_delay: Duration::from_millis(5),
        max_poll_delay: Duration::from_millis(50),
        lookback: 10,
    }
}

#[cfg(feature = "integration-test")]
pub use node::BitcoindNode;

#[cfg(feature = "integration-test")]
mod node {
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use atomicswap::watch::rpc::RPCConfig;
    use bitcoin::{
        secp256k1::rand::{distributions::Alphanumeric, thread_rng, Rng},
        Amount,
    };
    use bitcoind::{
        bitcoincore_rpc::{Auth, Client, RpcApi},
        BitcoinD, Conf,
    };

    fn get_random_tmp_dir() -> PathBuf {
        let s: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        PathBuf::from("/tmp/.atomicswap/".to_string() + &s)
    }

    /// A regtest bitcoind with a funded wallet and a background miner.
    pub struct BitcoindNode {
        bitcoind: BitcoinD,
        shutdown: Arc<AtomicBool>,
    }

    impl BitcoindNode {
        pub fn start() -> Arc<Self> {
            let temp_dir = get_random_tmp_dir();
            let mut conf = Conf::default();
            conf.staticdir = Some(temp_dir.join(".bitcoin"));
            let exe_path = bitcoind::exe_path().unwrap();
            log::info!("Executable path: {:?}", exe_path);
            let bitcoind = BitcoinD::with_conf(exe_path, &conf).unwrap();

            let node = Arc::new(BitcoindNode {
                bitcoind,
                shutdown: Arc::new(AtomicBool::new(false)),
            });
            node.generate_blocks(101);
            log::info!("bitcoind initiated!!");

            let miner = node.clone();
            thread::spawn(move || {
                while !miner.shutdown.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(500));
                    miner.generate_blocks(1);
                }
                log::info!("ending block generation thread");
            });
            node
        }

        pub fn client(&self) -> &Client {
            &self.bitcoind.client
        }

        /// A new wallet on this node holding `amount` confirmed sats.
        pub fn funded_wallet(&self, name: &str, amount: u64) -> Client {
            self.bitcoind
                .client
                .create_wallet(name, None, None, None, None)
                .unwrap();
            let config = RPCConfig {
                url: self.bitcoind.params.rpc_socket.to_string(),
                auth: Auth::CookieFile(self.bitcoind.params.cookie_file.clone()),
                wallet_name: name.to_string(),
            };
            let wallet = Client::try_from(&config).unwrap();
            let address = wallet.get_new_address(None, None).unwrap().assume_checked();
            self.bitcoind
                .client
                .send_to_address(
                    &address,
                    Amount::from_sat(amount),
                    None,
                    None,
                    None,
                    None,
                    None,
                    None,
                )
                .unwrap();
            self.generate_blocks(1);
            wallet
        }

        pub fn generate_blocks(&self, n: u64) {
            let mining_address = self
                .bitcoind
                .client
                .get_new_address(None, None)
                .unwrap()
                .assume_checked();
            self.bitcoind
                .client
                .generate_to_address(n, &mining_address)
                .unwrap();
        }

        pub fn stop(&self) {
            self.shutdown.store(true, Ordering::SeqCst);
            let _ = self.bitcoind.client.stop();
        }
    }
}
