//! Hash functions shared by the supported chains and the swap secret.

use std::{fmt, str::FromStr};

use bitcoin::{
    hashes::{hash160, ripemd160, sha256d, Hash},
    hex::{DisplayHex, FromHex, HexToArrayError},
    secp256k1::rand::{thread_rng, RngCore},
};
use blake_hash::{Blake256, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of the swap secret in bytes.
pub const PREIMAGE_LEN: usize = 32;

/// Hash committed to in both HTLCs of a trade: `RIPEMD160(SHA256(token))`.
pub type TokenHash = hash160::Hash;

/// `RIPEMD160(SHA256(data))`, the `OP_HASH160` of Bitcoin-like chains.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// `SHA256(SHA256(data))`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// Single BLAKE-256 (14 rounds), the base hash of Decred.
pub fn blake256(data: &[u8]) -> [u8; 32] {
    let digest = Blake256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// `RIPEMD160(BLAKE256(data))`, the `OP_HASH160` of Decred.
pub fn blake256_hash160(data: &[u8]) -> [u8; 20] {
    ripemd160::Hash::hash(&blake256(data)).to_byte_array()
}

/// The 32 byte swap secret. Revealing it on one chain unlocks the other.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage([u8; PREIMAGE_LEN]);

impl Preimage {
    /// Draw a fresh secret from the thread rng.
    pub fn random() -> Self {
        let mut bytes = [0u8; PREIMAGE_LEN];
        thread_rng().fill_bytes(&mut bytes);
        Preimage(bytes)
    }

    pub fn from_byte_array(bytes: [u8; PREIMAGE_LEN]) -> Self {
        Preimage(bytes)
    }

    /// Accepts a slice only if it has exactly [PREIMAGE_LEN] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; PREIMAGE_LEN]>::try_from(bytes).ok().map(Preimage)
    }

    pub fn to_byte_array(self) -> [u8; PREIMAGE_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; PREIMAGE_LEN] {
        &self.0
    }

    /// The token hash this secret opens.
    pub fn token_hash(&self) -> TokenHash {
        hash160::Hash::hash(&self.0)
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0[..].as_hex())
    }
}

// The secret is never printed in debug logs.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(hash: {})", self.token_hash())
    }
}

impl FromStr for Preimage {
    type Err = HexToArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Preimage(<[u8; PREIMAGE_LEN]>::from_hex(s)?))
    }
}

impl Serialize for Preimage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Preimage::from_str(&hex).map_err(serde::de::Error::custom)
    }
}
