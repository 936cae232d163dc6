//! The Trade Storage Interface.
//!
//! Trades are written as pretty JSON so an interrupted swap can be inspected and resumed
//! by hand. Secret keys are stored as hex and bound to their chain again on load.

use std::{
    fs::OpenOptions,
    io::{BufReader, BufWriter},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{Preimage, PrivateKey, TokenHash},
    utill::duration_secs,
};

use super::{error::TradeError, FundsData, Role, Stager, Trade, TradeInfo};

/// Persisted form of a [Trade].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TradeSnapshot {
    role: Role,
    #[serde(with = "duration_secs")]
    duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<Preimage>,
    token_hash: Option<TokenHash>,
    own_info: Option<TradeInfo>,
    trader_info: Option<TradeInfo>,
    redeem_key: Option<String>,
    recovery_key: Option<String>,
    redeemable_funds: Option<FundsData>,
    recoverable_funds: Option<FundsData>,
    stages: Stager,
}

impl From<Trade> for TradeSnapshot {
    fn from(trade: Trade) -> Self {
        TradeSnapshot {
            role: trade.role,
            duration: trade.duration,
            token: trade.token,
            token_hash: trade.token_hash,
            own_info: trade.own_info,
            trader_info: trade.trader_info,
            redeem_key: trade
                .redeem_key
                .map(|key| key.secret_key().display_secret().to_string()),
            recovery_key: trade
                .recovery_key
                .map(|key| key.secret_key().display_secret().to_string()),
            redeemable_funds: trade.redeemable_funds,
            recoverable_funds: trade.recoverable_funds,
            stages: trade.stager,
        }
    }
}

fn check_funds(funds: &Option<FundsData>, info: &Option<TradeInfo>) -> Result<(), TradeError> {
    match (funds, info) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(TradeError::Usage("funds without trade info")),
        (Some(funds), Some(info)) if funds.crypto() != info.crypto => {
            Err(TradeError::MismatchCrypto {
                expected: info.crypto,
                got: funds.crypto(),
            })
        }
        _ => Ok(()),
    }
}

impl TryFrom<TradeSnapshot> for Trade {
    type Error = TradeError;

    fn try_from(snapshot: TradeSnapshot) -> Result<Self, Self::Error> {
        // Identity first: keys and funds are typed by the chains of the infos.
        let redeem_key = match (&snapshot.redeem_key, &snapshot.trader_info) {
            (None, _) => None,
            (Some(hex), Some(trader)) => Some(PrivateKey::from_hex(trader.crypto, hex)?),
            (Some(_), None) => return Err(TradeError::Usage("redeem key without trader info")),
        };
        let recovery_key = match (&snapshot.recovery_key, &snapshot.own_info) {
            (None, _) => None,
            (Some(hex), Some(own)) => Some(PrivateKey::from_hex(own.crypto, hex)?),
            (Some(_), None) => return Err(TradeError::Usage("recovery key without own info")),
        };
        check_funds(&snapshot.redeemable_funds, &snapshot.trader_info)?;
        check_funds(&snapshot.recoverable_funds, &snapshot.own_info)?;

        let token_hash = match (snapshot.token, snapshot.token_hash) {
            (Some(token), Some(hash)) if token.token_hash() != hash => {
                return Err(TradeError::InvalidToken)
            }
            (Some(token), _) => Some(token.token_hash()),
            (None, hash) => hash,
        };

        Ok(Trade {
            role: snapshot.role,
            duration: snapshot.duration,
            token: snapshot.token,
            token_hash,
            own_info: snapshot.own_info,
            trader_info: snapshot.trader_info,
            redeem_key,
            recovery_key,
            redeemable_funds: snapshot.redeemable_funds,
            recoverable_funds: snapshot.recoverable_funds,
            stager: snapshot.stages,
        })
    }
}

impl Trade {
    /// Write the trade to `path`, replacing any previous version.
    pub fn write_to_disk(&self, path: &Path) -> Result<(), TradeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write: overwrites existing file.
        // create: creates new file if doesn't exist.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        log::debug!("Trade written to {}", path.display());
        Ok(())
    }

    /// Reads from a path (errors if path doesn't exist).
    pub fn read_from_disk(path: &Path) -> Result<Trade, TradeError> {
        let file = OpenOptions::new().read(true).open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
