//! Atomic Swap Protocol Messages.
//!
//! Only the negotiation travels between the parties. Everything after it happens on
//! the chains: deposits are found by watching the lock addresses and the token is
//! learned from the buyer's redeem input.
//!
//! ```shell
//! Buyer -> Seller: [TradeMessage::BuyProposal] (terms, token hash, buyer key hashes)
//! Seller -> Buyer: [TradeMessage::Locks] (both HTLC scripts)
//! Buyer locks on the buyer chain.
//! Seller sees the deposit and locks on the seller chain.
//! Buyer sees the deposit and redeems it, revealing the token.
//! Seller reads the token from the buyer's redeem and redeems the buyer's deposit.
//! ```

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::trade::{BuyProposal, Locks};

/// All messages exchanged between buyer and seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMessage {
    BuyProposal(BuyProposal),
    Locks(Locks),
}

impl Display for TradeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuyProposal(_) => write!(f, "BuyProposal"),
            Self::Locks(_) => write!(f, "Locks"),
        }
    }
}
