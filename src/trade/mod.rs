//! One party's view of an atomic swap.
//!
//! A [Trade] owns everything a party needs to finish or abort a swap: the token (or
//! only its hash, for the seller until the buyer reveals it), a redeem key for the
//! counterparty's chain, a recovery key for its own chain, both HTLCs with the
//! outputs found for them, and the remaining protocol stages.
//!
//! The buyer proposes, locks first and redeems with the token. The seller answers with
//! the locks, locks after the buyer's deposit is seen and redeems with the token the
//! buyer revealed. Each HTLC can be recovered by its funder once its locktime passed.
//! The seller's locktime is half the buyer's window, so the seller can always redeem
//! before the buyer can recover.

pub mod error;
pub mod funds;
pub mod handler;
pub mod proposal;
pub mod routines;
pub mod stages;
pub mod storage;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{Crypto, KeyData, Preimage, PrivateKey, TokenHash},
    tx::{Fee, Spend, SpendBranch, Tx},
};

pub use error::TradeError;
pub use funds::{FundsData, Lock, Output};
pub use handler::{Handler, StageHandler, StageResult, TradeOutcome};
pub use proposal::{BuyProposal, Locks, ProposalSide};
pub use stages::{Stage, Stager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

/// What one side of the trade pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInfo {
    pub crypto: Crypto,
    /// Amount in the chain's smallest unit.
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "storage::TradeSnapshot", try_from = "storage::TradeSnapshot")]
pub struct Trade {
    pub(crate) role: Role,
    pub(crate) duration: Duration,
    pub(crate) token: Option<Preimage>,
    pub(crate) token_hash: Option<TokenHash>,
    pub(crate) own_info: Option<TradeInfo>,
    pub(crate) trader_info: Option<TradeInfo>,
    pub(crate) redeem_key: Option<PrivateKey>,
    pub(crate) recovery_key: Option<PrivateKey>,
    pub(crate) redeemable_funds: Option<FundsData>,
    pub(crate) recoverable_funds: Option<FundsData>,
    pub(crate) stager: Stager,
}

impl Trade {
    /// A buyer trade paying `own` in exchange for `trader`, with a total HTLC window
    /// of `duration`.
    pub fn new_buyer(own: TradeInfo, trader: TradeInfo, duration: Duration) -> Self {
        let mut trade = Trade::empty(Role::Buyer);
        trade.duration = duration;
        trade.set_infos(own, trader);
        trade
    }

    /// A seller trade. Its terms come from the buyer's proposal.
    pub fn new_seller() -> Self {
        Trade::empty(Role::Seller)
    }

    fn empty(role: Role) -> Self {
        Trade {
            role,
            duration: Duration::ZERO,
            token: None,
            token_hash: None,
            own_info: None,
            trader_info: None,
            redeem_key: None,
            recovery_key: None,
            redeemable_funds: None,
            recoverable_funds: None,
            stager: Stager::new(role),
        }
    }

    pub(crate) fn set_infos(&mut self, own: TradeInfo, trader: TradeInfo) {
        self.own_info = Some(own);
        self.trader_info = Some(trader);
        self.recoverable_funds = Some(FundsData::new(own.crypto));
        self.redeemable_funds = Some(FundsData::new(trader.crypto));
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn own_info(&self) -> Option<&TradeInfo> {
        self.own_info.as_ref()
    }

    pub fn trader_info(&self) -> Option<&TradeInfo> {
        self.trader_info.as_ref()
    }

    pub fn token(&self) -> Option<&Preimage> {
        self.token.as_ref()
    }

    pub fn token_hash(&self) -> Option<&TokenHash> {
        self.token_hash.as_ref()
    }

    pub fn redeem_key(&self) -> Option<&PrivateKey> {
        self.redeem_key.as_ref()
    }

    pub fn recovery_key(&self) -> Option<&PrivateKey> {
        self.recovery_key.as_ref()
    }

    /// Counterparty's HTLC on the trader chain, spendable with the token.
    pub fn redeemable_funds(&self) -> Option<&FundsData> {
        self.redeemable_funds.as_ref()
    }

    pub fn redeemable_funds_mut(&mut self) -> Option<&mut FundsData> {
        self.redeemable_funds.as_mut()
    }

    /// Our own HTLC on our chain, spendable after its locktime.
    pub fn recoverable_funds(&self) -> Option<&FundsData> {
        self.recoverable_funds.as_ref()
    }

    pub fn recoverable_funds_mut(&mut self) -> Option<&mut FundsData> {
        self.recoverable_funds.as_mut()
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    pub fn stage(&self) -> Stage {
        self.stager.stage()
    }

    pub fn next_stage(&mut self) -> Stage {
        let stage = self.stager.next_stage();
        log::info!("{:?} trade moved to stage {}", self.role, stage);
        stage
    }

    pub(crate) fn locks_installed(&self) -> bool {
        [&self.redeemable_funds, &self.recoverable_funds]
            .iter()
            .any(|funds| funds.as_ref().is_some_and(|funds| funds.lock().is_some()))
    }

    /// Generate the redeem key for the trader chain and the recovery key for ours.
    pub fn generate_keys(&mut self) -> Result<(), TradeError> {
        let own = self.own_info.ok_or(TradeError::Usage("trade has no own info"))?;
        let trader = self
            .trader_info
            .ok_or(TradeError::Usage("trade has no trader info"))?;
        if self.locks_installed() {
            return Err(TradeError::Usage("keys are fixed once locks exist"));
        }
        let redeem_key = PrivateKey::generate(trader.crypto);
        let recovery_key = PrivateKey::generate(own.crypto);
        log::debug!(
            "Generated redeem key {} and recovery key {}",
            redeem_key.key_data(),
            recovery_key.key_data()
        );
        self.redeem_key = Some(redeem_key);
        self.recovery_key = Some(recovery_key);
        Ok(())
    }

    /// Draw a fresh token.
    pub fn generate_token(&mut self) -> Result<(), TradeError> {
        if self.locks_installed() {
            return Err(TradeError::Usage("token is fixed once locks exist"));
        }
        let token = Preimage::random();
        self.token = Some(token);
        self.token_hash = Some(token.token_hash());
        Ok(())
    }

    /// Learn the token. It must open the token hash if one is already known.
    pub fn set_token(&mut self, token: Preimage) -> Result<(), TradeError> {
        let hash = token.token_hash();
        if self.token_hash.is_some_and(|known| known != hash) {
            return Err(TradeError::InvalidToken);
        }
        self.token = Some(token);
        self.token_hash = Some(hash);
        Ok(())
    }

    pub fn set_token_hash(&mut self, token_hash: TokenHash) -> Result<(), TradeError> {
        if self.token.is_some_and(|token| token.token_hash() != token_hash) {
            return Err(TradeError::InvalidToken);
        }
        if self.locks_installed() && self.token_hash != Some(token_hash) {
            return Err(TradeError::MismatchTokenHash);
        }
        self.token_hash = Some(token_hash);
        Ok(())
    }

    /// Spend every redeemable output with the token to `destination` on the trader chain.
    pub fn redeem_tx(&self, destination: &KeyData, fee: Fee) -> Result<Tx, TradeError> {
        let token = self.token.as_ref().ok_or(TradeError::Usage("token is unknown"))?;
        let key = self
            .redeem_key
            .as_ref()
            .ok_or(TradeError::Usage("trade has no redeem key"))?;
        let funds = self
            .redeemable_funds
            .as_ref()
            .ok_or(TradeError::Usage("trade has no redeemable funds"))?;
        let lock = funds.require_lock()?;
        if funds.outputs().is_empty() {
            return Err(TradeError::Usage("no redeemable outputs"));
        }
        let tx = Spend {
            outputs: funds.outputs(),
            lock: lock.script(),
            key,
            branch: SpendBranch::Redeem(token),
            destination,
        }
        .build(fee)?;
        log::info!("Built redeem transaction {}", tx.txid());
        Ok(tx)
    }

    /// Spend every recoverable output back to `destination` on our chain, valid once
    /// the lock's locktime passed.
    pub fn recovery_tx(&self, destination: &KeyData, fee: Fee) -> Result<Tx, TradeError> {
        let key = self
            .recovery_key
            .as_ref()
            .ok_or(TradeError::Usage("trade has no recovery key"))?;
        let funds = self
            .recoverable_funds
            .as_ref()
            .ok_or(TradeError::Usage("trade has no recoverable funds"))?;
        let lock = funds.require_lock()?;
        if funds.outputs().is_empty() {
            return Err(TradeError::Usage("no recoverable outputs"));
        }
        let locktime = lock.lock_data()?.locktime;
        let tx = Spend {
            outputs: funds.outputs(),
            lock: lock.script(),
            key,
            branch: SpendBranch::Recovery { locktime },
            destination,
        }
        .build(fee)?;
        log::info!("Built recovery transaction {}, valid after {}", tx.txid(), locktime);
        Ok(tx)
    }
}
