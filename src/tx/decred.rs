//! Decred transactions.
//!
//! Decred splits a transaction into a prefix (inputs' outpoints, outputs, times) and
//! a witness (per input amount, block location and signature script). The txid only
//! covers the prefix, and signatures commit to BLAKE-256 digests of both parts.

use bitcoin::{consensus::encode::serialize, consensus::encode::VarInt, hex::DisplayHex};

use crate::crypto::blake256;

const SER_FULL: u16 = 0;
const SER_NO_WITNESS: u16 = 1;
const SER_WITNESS_SIGNING: u16 = 3;

/// Block index used in the witness of an input whose block is not known.
pub const NO_BLOCK_INDEX: u32 = 0xffff_ffff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecredTxIn {
    /// Previous txid in internal byte order.
    pub prev_hash: [u8; 32],
    pub prev_index: u32,
    pub tree: u8,
    pub sequence: u32,
    pub value_in: u64,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecredTxOut {
    pub value: u64,
    pub script_version: u16,
    pub pk_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecredTx {
    pub version: u16,
    pub inputs: Vec<DecredTxIn>,
    pub outputs: Vec<DecredTxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

fn put_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend(serialize(&VarInt(bytes.len() as u64)));
    buf.extend_from_slice(bytes);
}

impl DecredTx {
    fn put_version(&self, buf: &mut Vec<u8>, ser_type: u16) {
        let version = self.version as u32 | (ser_type as u32) << 16;
        buf.extend(version.to_le_bytes());
    }

    fn put_prefix(&self, buf: &mut Vec<u8>) {
        buf.extend(serialize(&VarInt(self.inputs.len() as u64)));
        for input in &self.inputs {
            buf.extend_from_slice(&input.prev_hash);
            buf.extend(input.prev_index.to_le_bytes());
            buf.push(input.tree);
            buf.extend(input.sequence.to_le_bytes());
        }
        buf.extend(serialize(&VarInt(self.outputs.len() as u64)));
        for output in &self.outputs {
            buf.extend(output.value.to_le_bytes());
            buf.extend(output.script_version.to_le_bytes());
            put_var_bytes(buf, &output.pk_script);
        }
        buf.extend(self.lock_time.to_le_bytes());
        buf.extend(self.expiry.to_le_bytes());
    }

    fn put_witness(&self, buf: &mut Vec<u8>) {
        buf.extend(serialize(&VarInt(self.inputs.len() as u64)));
        for input in &self.inputs {
            buf.extend(input.value_in.to_le_bytes());
            buf.extend(input.block_height.to_le_bytes());
            buf.extend(input.block_index.to_le_bytes());
            put_var_bytes(buf, &input.signature_script);
        }
    }

    /// Full wire serialization, prefix and witness.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.put_version(&mut buf, SER_FULL);
        self.put_prefix(&mut buf);
        self.put_witness(&mut buf);
        buf
    }

    fn prefix_hash(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        self.put_version(&mut buf, SER_NO_WITNESS);
        self.put_prefix(&mut buf);
        blake256(&buf)
    }

    /// Transaction hash in internal byte order.
    pub fn txid(&self) -> [u8; 32] {
        self.prefix_hash()
    }

    /// Transaction hash as displayed by Decred nodes, byte reversed hex.
    pub fn txid_hex(&self) -> String {
        let mut txid = self.txid();
        txid.reverse();
        txid[..].to_lower_hex_string()
    }

    /// `SIGHASH_ALL` digest of input `index` spending an output locked by `script`.
    pub fn signature_hash(&self, index: usize, script: &[u8], hash_type: u8) -> [u8; 32] {
        let mut witness = Vec::new();
        self.put_version(&mut witness, SER_WITNESS_SIGNING);
        witness.extend(serialize(&VarInt(self.inputs.len() as u64)));
        for i in 0..self.inputs.len() {
            put_var_bytes(&mut witness, if i == index { script } else { &[] });
        }

        let mut preimage = Vec::with_capacity(68);
        preimage.extend((hash_type as u32).to_le_bytes());
        preimage.extend(self.prefix_hash());
        preimage.extend(blake256(&witness));
        blake256(&preimage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> DecredTx {
        DecredTx {
            version: 1,
            inputs: vec![DecredTxIn {
                prev_hash: [0x11; 32],
                prev_index: 2,
                tree: 0,
                sequence: 0xffff_fffe,
                value_in: 100_000,
                block_height: 0,
                block_index: NO_BLOCK_INDEX,
                signature_script: vec![],
            }],
            outputs: vec![DecredTxOut {
                value: 99_000,
                script_version: 0,
                pk_script: vec![0x76, 0xa9],
            }],
            lock_time: 1_700_000_000,
            expiry: 0,
        }
    }

    #[test]
    fn test_wire_layout() {
        let tx = sample_tx();
        let raw = tx.serialize();
        // version 1, full serialization
        assert_eq!(&raw[..4], &[0x01, 0x00, 0x00, 0x00]);
        // one input: outpoint, index, tree, sequence
        assert_eq!(raw[4], 1);
        assert_eq!(&raw[5..37], &[0x11; 32]);
        assert_eq!(&raw[37..41], &2u32.to_le_bytes());
        assert_eq!(raw[41], 0);
        assert_eq!(&raw[42..46], &0xffff_fffeu32.to_le_bytes());
        // one output: value, script version, script
        assert_eq!(raw[46], 1);
        assert_eq!(&raw[47..55], &99_000u64.to_le_bytes());
        assert_eq!(&raw[55..57], &[0, 0]);
        assert_eq!(&raw[57..60], &[0x02, 0x76, 0xa9]);
        // locktime, expiry, then the witness
        assert_eq!(&raw[60..64], &1_700_000_000u32.to_le_bytes());
        assert_eq!(&raw[64..68], &[0; 4]);
        assert_eq!(raw[68], 1);
        assert_eq!(&raw[69..77], &100_000u64.to_le_bytes());
        assert_eq!(&raw[81..85], &NO_BLOCK_INDEX.to_le_bytes());
        assert_eq!(raw[85], 0);
        assert_eq!(raw.len(), 86);
    }

    #[test]
    fn test_txid_ignores_witness() {
        let tx = sample_tx();
        let mut signed = tx.clone();
        signed.inputs[0].signature_script = vec![0x51];
        assert_eq!(tx.txid(), signed.txid());
        assert_ne!(tx.serialize(), signed.serialize());

        let mut reversed = tx.txid();
        reversed.reverse();
        assert_eq!(tx.txid_hex(), reversed[..].to_lower_hex_string());
    }

    #[test]
    fn test_signature_hash_commits_to_script_and_prefix() {
        let tx = sample_tx();
        let base = tx.signature_hash(0, &[0x51], 0x01);
        assert_ne!(base, tx.signature_hash(0, &[0x52], 0x01));
        assert_ne!(base, tx.signature_hash(0, &[0x51], 0x02));

        let mut changed = tx.clone();
        changed.outputs[0].value -= 1;
        assert_ne!(base, changed.signature_hash(0, &[0x51], 0x01));

        // Signature scripts are not committed to.
        let mut signed = tx.clone();
        signed.inputs[0].signature_script = vec![0x00];
        assert_eq!(base, signed.signature_hash(0, &[0x51], 0x01));
    }
}
