//! The chains the swap engine can trade on.
//!
//! Every chain is a variant of the closed [Crypto] enum. What differs between chains
//! is data: the opcodes that compute the token digest, the key hash function, the
//! sighash algorithm and address version bytes. That data lives in one static
//! [CryptoParams] record per chain, looked up with [Crypto::params].

mod address;
mod digest;
mod key;

use std::{fmt, str::FromStr};

use bitcoin::opcodes::{all, Opcode};
use serde::{Deserialize, Serialize};

pub use address::AddressError;
pub use digest::{blake256, blake256_hash160, hash160, sha256d, Preimage, TokenHash, PREIMAGE_LEN};
pub use key::{KeyData, KeyError, PrivateKey};

/// Supported cryptocurrencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Crypto {
    Bitcoin,
    Litecoin,
    Dogecoin,
    BitcoinCash,
    Decred,
}

/// The network a chain client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Mainnet,
    Testnet,
    /// Decred's simulation network.
    Simnet,
    Regtest,
}

/// How a chain computes the digest an input signature commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SighashKind {
    /// Original Bitcoin algorithm, used by Bitcoin, Litecoin and Dogecoin.
    Legacy,
    /// BIP143 digest with the FORKID flag, used by Bitcoin Cash.
    ForkId,
    /// BLAKE-256 prefix/witness digest.
    Decred,
}

/// Base58 checksum used by a chain's addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    DoubleSha256,
    DoubleBlake256,
}

/// Version bytes prefixed to a hash in a base58check address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressVersions {
    pub pubkey_hash: &'static [u8],
    pub script_hash: &'static [u8],
}

/// Static capabilities of one chain.
#[derive(Debug)]
pub struct CryptoParams {
    /// Ticker symbol.
    pub ticker: &'static str,
    /// Opcodes that turn the revealed token into the committed token hash.
    pub token_digest_ops: &'static [Opcode],
    /// Hash applied to public keys and redeem scripts by `OP_HASH160`.
    pub key_hash: fn(&[u8]) -> [u8; 20],
    pub sighash: SighashKind,
    /// Byte appended to every signature.
    pub sighash_type: u8,
    pub tx_version: i32,
    pub checksum: Checksum,
    pub networks: &'static [(Chain, AddressVersions)],
}

/// Decred reuses 0xc0 for `OP_SHA256`.
pub const DCR_OP_SHA256: Opcode = all::OP_RETURN_192;

const BTC_MAIN: AddressVersions = AddressVersions {
    pubkey_hash: &[0x00],
    script_hash: &[0x05],
};

const BTC_TEST: AddressVersions = AddressVersions {
    pubkey_hash: &[0x6f],
    script_hash: &[0xc4],
};

static BITCOIN: CryptoParams = CryptoParams {
    ticker: "BTC",
    token_digest_ops: &[all::OP_HASH160],
    key_hash: hash160,
    sighash: SighashKind::Legacy,
    sighash_type: 0x01,
    tx_version: 2,
    checksum: Checksum::DoubleSha256,
    networks: &[
        (Chain::Mainnet, BTC_MAIN),
        (Chain::Testnet, BTC_TEST),
        (Chain::Regtest, BTC_TEST),
    ],
};

static LITECOIN: CryptoParams = CryptoParams {
    ticker: "LTC",
    token_digest_ops: &[all::OP_HASH160],
    key_hash: hash160,
    sighash: SighashKind::Legacy,
    sighash_type: 0x01,
    tx_version: 2,
    checksum: Checksum::DoubleSha256,
    networks: &[
        (
            Chain::Mainnet,
            AddressVersions {
                pubkey_hash: &[0x30],
                script_hash: &[0x32],
            },
        ),
        (
            Chain::Testnet,
            AddressVersions {
                pubkey_hash: &[0x6f],
                script_hash: &[0x3a],
            },
        ),
        (
            Chain::Regtest,
            AddressVersions {
                pubkey_hash: &[0x6f],
                script_hash: &[0x3a],
            },
        ),
    ],
};

static DOGECOIN: CryptoParams = CryptoParams {
    ticker: "DOGE",
    token_digest_ops: &[all::OP_HASH160],
    key_hash: hash160,
    sighash: SighashKind::Legacy,
    sighash_type: 0x01,
    tx_version: 1,
    checksum: Checksum::DoubleSha256,
    networks: &[
        (
            Chain::Mainnet,
            AddressVersions {
                pubkey_hash: &[0x1e],
                script_hash: &[0x16],
            },
        ),
        (
            Chain::Testnet,
            AddressVersions {
                pubkey_hash: &[0x71],
                script_hash: &[0xc4],
            },
        ),
        (Chain::Regtest, BTC_TEST),
    ],
};

static BITCOIN_CASH: CryptoParams = CryptoParams {
    ticker: "BCH",
    token_digest_ops: &[all::OP_HASH160],
    key_hash: hash160,
    sighash: SighashKind::ForkId,
    sighash_type: 0x41,
    tx_version: 2,
    checksum: Checksum::DoubleSha256,
    networks: &[
        (Chain::Mainnet, BTC_MAIN),
        (Chain::Testnet, BTC_TEST),
        (Chain::Regtest, BTC_TEST),
    ],
};

static DECRED: CryptoParams = CryptoParams {
    ticker: "DCR",
    token_digest_ops: &[DCR_OP_SHA256, all::OP_RIPEMD160],
    key_hash: blake256_hash160,
    sighash: SighashKind::Decred,
    sighash_type: 0x01,
    tx_version: 1,
    checksum: Checksum::DoubleBlake256,
    networks: &[
        (
            Chain::Mainnet,
            AddressVersions {
                pubkey_hash: &[0x07, 0x3f],
                script_hash: &[0x07, 0x1a],
            },
        ),
        (
            Chain::Testnet,
            AddressVersions {
                pubkey_hash: &[0x0f, 0x21],
                script_hash: &[0x0e, 0xfc],
            },
        ),
        (
            Chain::Simnet,
            AddressVersions {
                pubkey_hash: &[0x0e, 0x91],
                script_hash: &[0x0e, 0x6c],
            },
        ),
        (
            Chain::Regtest,
            AddressVersions {
                pubkey_hash: &[0x0e, 0x00],
                script_hash: &[0x0d, 0xdb],
            },
        ),
    ],
};

impl Crypto {
    pub const ALL: [Crypto; 5] = [
        Crypto::Bitcoin,
        Crypto::Litecoin,
        Crypto::Dogecoin,
        Crypto::BitcoinCash,
        Crypto::Decred,
    ];

    pub fn params(self) -> &'static CryptoParams {
        match self {
            Crypto::Bitcoin => &BITCOIN,
            Crypto::Litecoin => &LITECOIN,
            Crypto::Dogecoin => &DOGECOIN,
            Crypto::BitcoinCash => &BITCOIN_CASH,
            Crypto::Decred => &DECRED,
        }
    }

    /// Hash a public key or script the way this chain's `OP_HASH160` does.
    pub fn key_hash(self, data: &[u8]) -> [u8; 20] {
        (self.params().key_hash)(data)
    }

    pub fn ticker(self) -> &'static str {
        self.params().ticker
    }
}

impl fmt::Display for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Crypto::Bitcoin => "bitcoin",
            Crypto::Litecoin => "litecoin",
            Crypto::Dogecoin => "dogecoin",
            Crypto::BitcoinCash => "bitcoin-cash",
            Crypto::Decred => "decred",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Crypto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Crypto::ALL
            .into_iter()
            .find(|crypto| crypto.to_string() == s || crypto.ticker().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown crypto: {}", s))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Chain::Mainnet => "mainnet",
            Chain::Testnet => "testnet",
            Chain::Simnet => "simnet",
            Chain::Regtest => "regtest",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "main" => Ok(Chain::Mainnet),
            "testnet" | "test" => Ok(Chain::Testnet),
            "simnet" => Ok(Chain::Simnet),
            "regtest" => Ok(Chain::Regtest),
            _ => Err(format!("unknown chain: {}", s)),
        }
    }
}
