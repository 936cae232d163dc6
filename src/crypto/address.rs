//! Base58check addresses for the supported chains.

use std::fmt;

use bitcoin::{base58, blockdata::opcodes::all, script::Builder, ScriptBuf};

use super::{blake256, AddressVersions, Chain, Checksum, Crypto, KeyData};

#[derive(Debug)]
pub enum AddressError {
    /// The chain has no such network, like a Bitcoin simnet.
    UnsupportedChain { crypto: Crypto, chain: Chain },
    /// Not base58, with the decoder's message.
    Base58(String),
    InvalidChecksum,
    /// Version bytes or payload length do not match the chain and network.
    UnknownVersion(Vec<u8>),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AddressError {}

impl Crypto {
    pub fn address_versions(self, chain: Chain) -> Result<&'static AddressVersions, AddressError> {
        self.params()
            .networks
            .iter()
            .find(|(network, _)| *network == chain)
            .map(|(_, versions)| versions)
            .ok_or(AddressError::UnsupportedChain {
                crypto: self,
                chain,
            })
    }

    /// Address paying to the script whose key hash is `script_hash`.
    pub fn script_hash_address(
        self,
        chain: Chain,
        script_hash: &[u8; 20],
    ) -> Result<String, AddressError> {
        let versions = self.address_versions(chain)?;
        Ok(self.encode_address(versions.script_hash, script_hash))
    }

    /// Address paying to the public key with key hash `key_data`.
    pub fn pubkey_hash_address(
        self,
        chain: Chain,
        key_data: &KeyData,
    ) -> Result<String, AddressError> {
        let versions = self.address_versions(chain)?;
        Ok(self.encode_address(versions.pubkey_hash, key_data.as_bytes()))
    }

    /// Decode an address of this chain and network into its output script.
    pub fn address_script_pubkey(
        self,
        chain: Chain,
        address: &str,
    ) -> Result<ScriptBuf, AddressError> {
        let versions = self.address_versions(chain)?;
        let payload = match self.params().checksum {
            Checksum::DoubleSha256 => {
                base58::decode_check(address).map_err(|e| AddressError::Base58(e.to_string()))?
            }
            Checksum::DoubleBlake256 => {
                let mut data =
                    base58::decode(address).map_err(|e| AddressError::Base58(e.to_string()))?;
                if data.len() < 4 {
                    return Err(AddressError::InvalidChecksum);
                }
                let checksum = data.split_off(data.len() - 4);
                if blake256(&blake256(&data))[..4] != checksum[..] {
                    return Err(AddressError::InvalidChecksum);
                }
                data
            }
        };

        let version_len = versions.pubkey_hash.len();
        if payload.len() != version_len + 20 {
            return Err(AddressError::UnknownVersion(payload));
        }
        let (version, hash) = payload.split_at(version_len);
        if version == versions.pubkey_hash {
            Ok(Builder::new()
                .push_opcode(all::OP_DUP)
                .push_opcode(all::OP_HASH160)
                .push_slice(<[u8; 20]>::try_from(hash).map_err(|_| AddressError::InvalidChecksum)?)
                .push_opcode(all::OP_EQUALVERIFY)
                .push_opcode(all::OP_CHECKSIG)
                .into_script())
        } else if version == versions.script_hash {
            Ok(Builder::new()
                .push_opcode(all::OP_HASH160)
                .push_slice(<[u8; 20]>::try_from(hash).map_err(|_| AddressError::InvalidChecksum)?)
                .push_opcode(all::OP_EQUAL)
                .into_script())
        } else {
            Err(AddressError::UnknownVersion(version.to_vec()))
        }
    }

    fn encode_address(self, version: &[u8], hash: &[u8; 20]) -> String {
        let mut payload = Vec::with_capacity(version.len() + 24);
        payload.extend_from_slice(version);
        payload.extend_from_slice(hash);
        match self.params().checksum {
            Checksum::DoubleSha256 => base58::encode_check(&payload),
            Checksum::DoubleBlake256 => {
                let checksum = blake256(&blake256(&payload));
                payload.extend_from_slice(&checksum[..4]);
                base58::encode(&payload)
            }
        }
    }
}
