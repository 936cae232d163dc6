//! Chain bound private keys and the public key hashes they commit to.

use std::{fmt, str::FromStr};

use bitcoin::{
    hex::{DisplayHex, FromHex, HexToArrayError},
    secp256k1::{rand::thread_rng, Message, PublicKey, Secp256k1, SecretKey},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Crypto;

/// A 20 byte public key hash, as pushed into the HTLC and P2PKH scripts.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyData([u8; 20]);

impl KeyData {
    pub fn from_byte_array(bytes: [u8; 20]) -> Self {
        KeyData(bytes)
    }

    pub fn to_byte_array(self) -> [u8; 20] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0[..].as_hex())
    }
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyData({})", self)
    }
}

impl FromStr for KeyData {
    type Err = HexToArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(KeyData(<[u8; 20]>::from_hex(s)?))
    }
}

impl Serialize for KeyData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        KeyData::from_str(&hex).map_err(serde::de::Error::custom)
    }
}

/// Errors while reading keys and key hashes from untyped documents.
#[derive(Debug)]
pub enum KeyError {
    Hex(HexToArrayError),
    Secp(bitcoin::secp256k1::Error),
    /// A key hash that is not 20 bytes, or otherwise unusable on the named chain.
    InvalidKeyData { crypto: Crypto, data: String },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for KeyError {}

impl From<HexToArrayError> for KeyError {
    fn from(value: HexToArrayError) -> Self {
        Self::Hex(value)
    }
}

impl From<bitcoin::secp256k1::Error> for KeyError {
    fn from(value: bitcoin::secp256k1::Error) -> Self {
        Self::Secp(value)
    }
}

impl Crypto {
    /// Parse a hex key hash that is meant to be used on this chain.
    pub fn parse_key_data(self, hex: &str) -> Result<KeyData, KeyError> {
        KeyData::from_str(hex).map_err(|_| KeyError::InvalidKeyData {
            crypto: self,
            data: hex.to_string(),
        })
    }
}

/// A secp256k1 secret key together with the chain it signs for.
///
/// Every supported chain uses secp256k1 ECDSA, but the public key hash differs
/// (Decred hashes with BLAKE-256), so a key is never used outside its chain.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    crypto: Crypto,
    inner: SecretKey,
}

impl PrivateKey {
    pub fn generate(crypto: Crypto) -> Self {
        PrivateKey {
            crypto,
            inner: SecretKey::new(&mut thread_rng()),
        }
    }

    pub fn from_secret_key(crypto: Crypto, inner: SecretKey) -> Self {
        PrivateKey { crypto, inner }
    }

    pub fn from_hex(crypto: Crypto, hex: &str) -> Result<Self, KeyError> {
        let bytes = <[u8; 32]>::from_hex(hex)?;
        Ok(PrivateKey {
            crypto,
            inner: SecretKey::from_slice(&bytes)?,
        })
    }

    pub fn crypto(&self) -> Crypto {
        self.crypto
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.inner
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::signing_only(), &self.inner)
    }

    /// The key hash of the compressed public key, with the chain's key hash function.
    pub fn key_data(&self) -> KeyData {
        KeyData(self.crypto.key_hash(&self.public_key().serialize()))
    }

    /// Low-R ECDSA signature over `digest`, DER encoded, with the chain's sighash
    /// type byte appended.
    pub fn sign(&self, digest: [u8; 32]) -> Vec<u8> {
        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa_low_r(&Message::from_digest(digest), &self.inner);
        let mut sig = signature.serialize_der().to_vec();
        sig.push(self.crypto.params().sighash_type);
        sig
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("crypto", &self.crypto)
            .field("key_data", &self.key_data())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::ecdsa::Signature;

    use super::*;

    #[test]
    fn test_key_data_follows_chain_hash() {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let btc = PrivateKey::from_secret_key(Crypto::Bitcoin, secret);
        let ltc = PrivateKey::from_secret_key(Crypto::Litecoin, secret);
        let dcr = PrivateKey::from_secret_key(Crypto::Decred, secret);

        assert_eq!(btc.key_data(), ltc.key_data());
        assert_ne!(btc.key_data(), dcr.key_data());
        assert_eq!(
            dcr.key_data().to_byte_array(),
            crate::crypto::blake256_hash160(&dcr.public_key().serialize())
        );
    }

    #[test]
    fn test_sign_appends_sighash_type() {
        let digest = [0x42; 32];
        for crypto in [Crypto::Bitcoin, Crypto::BitcoinCash] {
            let key = PrivateKey::generate(crypto);
            let sig = key.sign(digest);
            let (hashtype, der) = sig.split_last().unwrap();
            assert_eq!(*hashtype, crypto.params().sighash_type);

            let signature = Signature::from_der(der).unwrap();
            Secp256k1::verification_only()
                .verify_ecdsa(&Message::from_digest(digest), &signature, &key.public_key())
                .unwrap();
        }
    }

    #[test]
    fn test_parse_key_data() {
        let data = "79fbfc3f34e7745860d76137da68f362380c606c";
        let key_data = Crypto::Litecoin.parse_key_data(data).unwrap();
        assert_eq!(key_data.to_string(), data);

        assert!(matches!(
            Crypto::Decred.parse_key_data("79fbfc3f"),
            Err(KeyError::InvalidKeyData {
                crypto: Crypto::Decred,
                ..
            })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = PrivateKey::from_hex(
            Crypto::Bitcoin,
            "0101010101010101010101010101010101010101010101010101010101010101",
        )
        .unwrap();
        assert!(!format!("{:?}", key).contains("0101010101"));
    }
}
