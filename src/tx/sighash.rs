//! Signature digests of the Bitcoin-like chains.

use bitcoin::{
    consensus::encode::serialize,
    hashes::{sha256d, Hash},
    sighash::SighashCache,
    Script, Transaction,
};

use super::TxError;

/// The original Bitcoin sighash, used by Bitcoin, Litecoin and Dogecoin.
pub(crate) fn legacy_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    sighash_type: u8,
) -> Result<[u8; 32], TxError> {
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(index, script_code, sighash_type as u32)
        .map_err(|e| TxError::Sighash(e.to_string()))?;
    Ok(sighash.to_byte_array())
}

/// BIP143 digest with the FORKID flag set in `sighash_type`, used by Bitcoin Cash.
pub(crate) fn forkid_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    amount: u64,
    sighash_type: u8,
) -> Result<[u8; 32], TxError> {
    let input = tx
        .input
        .get(index)
        .ok_or_else(|| TxError::Sighash(format!("no input at index {}", index)))?;

    let mut prevouts = Vec::new();
    let mut sequences = Vec::new();
    for txin in &tx.input {
        prevouts.extend(serialize(&txin.previous_output));
        sequences.extend(txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend(serialize(txout));
    }

    let mut preimage = Vec::with_capacity(160 + script_code.len());
    preimage.extend(tx.version.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&prevouts).to_byte_array());
    preimage.extend(sha256d::Hash::hash(&sequences).to_byte_array());
    preimage.extend(serialize(&input.previous_output));
    preimage.extend(serialize(&script_code.to_owned()));
    preimage.extend(amount.to_le_bytes());
    preimage.extend(input.sequence.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&outputs).to_byte_array());
    preimage.extend(tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend((sighash_type as u32).to_le_bytes());

    Ok(sha256d::Hash::hash(&preimage).to_byte_array())
}
