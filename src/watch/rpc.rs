//! [ChainClient] over the Bitcoin Core JSON-RPC interface.
//!
//! Litecoin, Dogecoin and Bitcoin Cash nodes expose the same calls and transaction
//! encoding for the outputs a trade touches.

use std::str::FromStr;

use bitcoin::{
    address::NetworkUnchecked, consensus::encode::deserialize, Address, Amount, BlockHash,
    Transaction, Txid,
};
use bitcoind::bitcoincore_rpc::{jsonrpc, Auth, Client, Error as RpcError, RpcApi};

use super::{ChainBlock, ChainClient, ChainTransaction, ClientError, TxInput, TxOutput};

/// `getblockhash` answers this for heights above the tip.
const RPC_INVALID_PARAMETER: i32 = -8;
const RPC_VERIFY_ERROR: i32 = -25;
const RPC_VERIFY_REJECTED: i32 = -26;

impl From<RpcError> for ClientError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::JsonRpc(jsonrpc::Error::Rpc(ref e))
                if e.code == RPC_VERIFY_REJECTED || e.code == RPC_VERIFY_ERROR =>
            {
                ClientError::Rejected(e.message.clone())
            }
            e => ClientError::Rpc(e),
        }
    }
}

fn block_hash_error(error: RpcError) -> ClientError {
    match error {
        RpcError::JsonRpc(jsonrpc::Error::Rpc(ref e)) if e.code == RPC_INVALID_PARAMETER => {
            ClientError::NoBlock
        }
        e => e.into(),
    }
}

pub struct RPCConfig {
    /// The node url, `host:port`
    pub url: String,
    /// The node authentication mechanism
    pub auth: Auth,
    /// Wallet funding the trade's locks.
    pub wallet_name: String,
}

const RPC_WALLET: &str = "atomicswap";
const RPC_HOSTPORT: &str = "localhost:18443";

impl Default for RPCConfig {
    fn default() -> Self {
        Self {
            url: RPC_HOSTPORT.to_string(),
            auth: Auth::UserPass("regtestrpcuser".to_string(), "regtestrpcpass".to_string()),
            wallet_name: RPC_WALLET.to_string(),
        }
    }
}

impl TryFrom<&RPCConfig> for Client {
    type Error = ClientError;
    fn try_from(config: &RPCConfig) -> Result<Self, ClientError> {
        let rpc = Client::new(
            &format!("http://{}/wallet/{}", config.url, config.wallet_name),
            config.auth.clone(),
        )?;
        log::info!(
            "Connected to {} node at {}",
            rpc.get_blockchain_info()?.chain,
            config.url
        );
        Ok(rpc)
    }
}

fn parse<T: FromStr>(value: &str) -> Result<T, ClientError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ClientError::Parse(format!("{}: {}", value, e)))
}

fn parse_address(address: &str) -> Result<Address, ClientError> {
    Ok(parse::<Address<NetworkUnchecked>>(address)?.assume_checked())
}

impl From<&Transaction> for ChainTransaction {
    fn from(tx: &Transaction) -> Self {
        ChainTransaction {
            txid: tx.compute_txid().to_string(),
            inputs: tx
                .input
                .iter()
                .map(|input| TxInput {
                    prev_txid: input.previous_output.txid.to_string(),
                    prev_index: input.previous_output.vout,
                    unlock_script: input.script_sig.clone(),
                })
                .collect(),
            outputs: tx
                .output
                .iter()
                .map(|output| TxOutput {
                    amount: output.value.to_sat(),
                    script: output.script_pubkey.clone(),
                })
                .collect(),
        }
    }
}

impl ChainClient for Client {
    fn block_count(&self) -> Result<u64, ClientError> {
        Ok(self.get_block_count()?)
    }

    fn block_hash(&self, height: u64) -> Result<String, ClientError> {
        Ok(self
            .get_block_hash(height)
            .map_err(block_hash_error)?
            .to_string())
    }

    fn block(&self, hash: &str) -> Result<ChainBlock, ClientError> {
        let hash: BlockHash = parse(hash)?;
        let info = self.get_block_info(&hash)?;
        let block = self.get_block(&hash)?;
        Ok(ChainBlock {
            hash: hash.to_string(),
            height: info.height as u64,
            transactions: block.txdata.iter().map(ChainTransaction::from).collect(),
            prev_hash: info.previousblockhash.map(|h| h.to_string()),
            next_hash: info.nextblockhash.map(|h| h.to_string()),
        })
    }

    fn transaction(&self, txid: &str) -> Result<ChainTransaction, ClientError> {
        let txid: Txid = parse(txid)?;
        let raw = self.get_transaction(&txid, None)?.hex;
        let tx: Transaction = deserialize(&raw).map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(ChainTransaction::from(&tx))
    }

    fn balance(&self) -> Result<u64, ClientError> {
        Ok(self.get_balance(None, None)?.to_sat())
    }

    fn new_address(&self) -> Result<String, ClientError> {
        Ok(self.get_new_address(None, None)?.assume_checked().to_string())
    }

    fn send_to_address(&self, address: &str, amount: u64) -> Result<String, ClientError> {
        let txid = RpcApi::send_to_address(
            self,
            &parse_address(address)?,
            Amount::from_sat(amount),
            None,
            None,
            None,
            None,
            None,
            None,
        )?;
        Ok(txid.to_string())
    }

    fn send_raw_transaction(&self, tx: &[u8]) -> Result<String, ClientError> {
        Ok(RpcApi::send_raw_transaction(self, tx)?.to_string())
    }

    fn generate_to_address(&self, blocks: u64, address: &str) -> Result<Vec<String>, ClientError> {
        Ok(RpcApi::generate_to_address(self, blocks, &parse_address(address)?)?
            .iter()
            .map(|hash| hash.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i32) -> RpcError {
        RpcError::JsonRpc(jsonrpc::Error::Rpc(jsonrpc::error::RpcError {
            code,
            message: format!("code {}", code),
            data: None,
        }))
    }

    #[test]
    fn test_error_codes() {
        assert!(matches!(
            block_hash_error(rpc_error(RPC_INVALID_PARAMETER)),
            ClientError::NoBlock
        ));
        // Only a height above the tip means no block yet.
        assert!(matches!(
            ClientError::from(rpc_error(RPC_INVALID_PARAMETER)),
            ClientError::Rpc(_)
        ));
        assert!(matches!(
            block_hash_error(rpc_error(RPC_VERIFY_REJECTED)),
            ClientError::Rejected(message) if message == "code -26"
        ));
        assert!(matches!(
            ClientError::from(rpc_error(RPC_VERIFY_ERROR)),
            ClientError::Rejected(_)
        ));
    }
}
