use crate::{
    crypto::{AddressError, Crypto, KeyError},
    error::NetError,
    protocol::error::ContractError,
    tx::TxError,
    watch::ClientError,
};

use super::stages::Stage;

/// Errors of the trade state machine and the stages driving it.
#[derive(Debug)]
pub enum TradeError {
    /// The operation is not allowed in the trade's current role or state.
    Usage(&'static str),
    /// Stages of the trade that have no handler installed.
    UnhandledStages(Vec<Stage>),
    /// Buyer and seller locktimes are not half the trade duration apart.
    InvalidLockInterval { expected: u64, got: i64 },
    /// `now + duration` does not fit a 32-bit locktime.
    InvalidLocktime { now: u64, duration: u64 },
    MismatchTokenHash,
    MismatchKeyData,
    MismatchCrypto { expected: Crypto, got: Crypto },
    /// The token does not hash to the trade's token hash.
    InvalidToken,
    /// The watched lock was spent through its recovery branch.
    FundsRecovered,
    /// A message of another kind than the stage expects.
    UnexpectedMessage(&'static str),
    Contract(ContractError),
    Key(KeyError),
    Address(AddressError),
    Tx(TxError),
    Client(ClientError),
    Net(NetError),
    IO(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TradeError {}

impl From<ContractError> for TradeError {
    fn from(value: ContractError) -> Self {
        Self::Contract(value)
    }
}

impl From<KeyError> for TradeError {
    fn from(value: KeyError) -> Self {
        Self::Key(value)
    }
}

impl From<AddressError> for TradeError {
    fn from(value: AddressError) -> Self {
        Self::Address(value)
    }
}

impl From<TxError> for TradeError {
    fn from(value: TxError) -> Self {
        Self::Tx(value)
    }
}

impl From<ClientError> for TradeError {
    fn from(value: ClientError) -> Self {
        Self::Client(value)
    }
}

impl From<NetError> for TradeError {
    fn from(value: NetError) -> Self {
        Self::Net(value)
    }
}

impl From<std::io::Error> for TradeError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_json::Error> for TradeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
