//! Negotiation: the buyer's proposal and the seller's locks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{Crypto, KeyData, KeyError, PrivateKey, TokenHash},
    protocol::contract::LockData,
    utill::{duration_secs, unix_time},
};

use super::{error::TradeError, Lock, Role, Trade, TradeInfo};

/// Terms for one side of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSide {
    pub crypto: Crypto,
    pub amount: u64,
    /// How long this side's HTLC stays unrecoverable.
    #[serde(with = "duration_secs")]
    pub lock_duration: Duration,
}

/// The buyer's offer, sent to the seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ProposalDocument", try_from = "ProposalDocument")]
pub struct BuyProposal {
    pub buyer: ProposalSide,
    pub seller: ProposalSide,
    pub token_hash: TokenHash,
    /// Buyer's key hash on the seller chain.
    pub redeem_key_data: KeyData,
    /// Buyer's key hash on the buyer chain.
    pub recovery_key_data: KeyData,
}

/// Wire shape of [BuyProposal]. Key data is only typed once both sides' chains are known.
#[derive(Serialize, Deserialize)]
struct ProposalDocument {
    buyer: ProposalSide,
    seller: ProposalSide,
    token_hash: TokenHash,
    redeem_key_data: String,
    recovery_key_data: String,
}

impl From<BuyProposal> for ProposalDocument {
    fn from(proposal: BuyProposal) -> Self {
        ProposalDocument {
            buyer: proposal.buyer,
            seller: proposal.seller,
            token_hash: proposal.token_hash,
            redeem_key_data: proposal.redeem_key_data.to_string(),
            recovery_key_data: proposal.recovery_key_data.to_string(),
        }
    }
}

impl TryFrom<ProposalDocument> for BuyProposal {
    type Error = KeyError;

    fn try_from(document: ProposalDocument) -> Result<Self, Self::Error> {
        Ok(BuyProposal {
            redeem_key_data: document.seller.crypto.parse_key_data(&document.redeem_key_data)?,
            recovery_key_data: document.buyer.crypto.parse_key_data(&document.recovery_key_data)?,
            buyer: document.buyer,
            seller: document.seller,
            token_hash: document.token_hash,
        })
    }
}

/// Both HTLCs of a trade, built by the seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locks {
    /// Locks the buyer's deposit on the buyer chain.
    pub buyer: Lock,
    /// Locks the seller's deposit on the seller chain.
    pub seller: Lock,
}

/// Unix time `now + duration` as a 32-bit locktime.
fn locktime_after(now: u64, duration: u64) -> Result<u32, TradeError> {
    now.checked_add(duration)
        .and_then(|secs| u32::try_from(secs).ok())
        .ok_or(TradeError::InvalidLocktime { now, duration })
}

impl Trade {
    pub fn generate_buy_proposal(&self) -> Result<BuyProposal, TradeError> {
        if self.role != Role::Buyer {
            return Err(TradeError::Usage("only the buyer proposes"));
        }
        let own = self.own_info.ok_or(TradeError::Usage("trade has no own info"))?;
        let trader = self
            .trader_info
            .ok_or(TradeError::Usage("trade has no trader info"))?;
        let token_hash = self
            .token_hash
            .ok_or(TradeError::Usage("token is not generated"))?;
        let redeem_key = self
            .redeem_key
            .as_ref()
            .ok_or(TradeError::Usage("keys are not generated"))?;
        let recovery_key = self
            .recovery_key
            .as_ref()
            .ok_or(TradeError::Usage("keys are not generated"))?;

        Ok(BuyProposal {
            buyer: ProposalSide {
                crypto: own.crypto,
                amount: own.amount,
                lock_duration: self.duration,
            },
            seller: ProposalSide {
                crypto: trader.crypto,
                amount: trader.amount,
                lock_duration: Duration::from_secs(self.duration.as_secs() / 2),
            },
            token_hash,
            redeem_key_data: redeem_key.key_data(),
            recovery_key_data: recovery_key.key_data(),
        })
    }

    /// Take the buyer's terms, generate keys and build both locks starting now.
    pub fn accept_buy_proposal(&mut self, proposal: &BuyProposal) -> Result<Locks, TradeError> {
        self.accept_buy_proposal_at(proposal, unix_time())
    }

    /// As [Trade::accept_buy_proposal], with `now` as the reference unix time.
    ///
    /// The buyer's lock expires at `now + D`, the seller's `D / 2` earlier.
    pub fn accept_buy_proposal_at(
        &mut self,
        proposal: &BuyProposal,
        now: u64,
    ) -> Result<Locks, TradeError> {
        if self.role != Role::Seller {
            return Err(TradeError::Usage("only the seller accepts a proposal"));
        }
        if self.locks_installed() {
            return Err(TradeError::Usage("proposal already accepted"));
        }
        let duration = proposal.buyer.lock_duration.as_secs();
        let half = duration / 2;
        if proposal.seller.lock_duration.as_secs() != half {
            return Err(TradeError::InvalidLockInterval {
                expected: half,
                got: proposal.seller.lock_duration.as_secs() as i64,
            });
        }
        let buyer_locktime = locktime_after(now, duration)?;
        let seller_locktime = buyer_locktime - half as u32;

        // The trade is only changed once the proposal passed every check.
        let redeem_key = PrivateKey::generate(proposal.buyer.crypto);
        let recovery_key = PrivateKey::generate(proposal.seller.crypto);
        let locks = Locks {
            buyer: Lock::from_lock_data(
                proposal.buyer.crypto,
                &LockData {
                    locktime: buyer_locktime,
                    token_hash: proposal.token_hash,
                    recovery_key_hash: proposal.recovery_key_data,
                    redeem_key_hash: redeem_key.key_data(),
                },
            ),
            seller: Lock::from_lock_data(
                proposal.seller.crypto,
                &LockData {
                    locktime: seller_locktime,
                    token_hash: proposal.token_hash,
                    recovery_key_hash: recovery_key.key_data(),
                    redeem_key_hash: proposal.redeem_key_data,
                },
            ),
        };

        self.duration = proposal.buyer.lock_duration;
        self.set_infos(
            TradeInfo {
                crypto: proposal.seller.crypto,
                amount: proposal.seller.amount,
            },
            TradeInfo {
                crypto: proposal.buyer.crypto,
                amount: proposal.buyer.amount,
            },
        );
        self.token = None;
        self.token_hash = Some(proposal.token_hash);
        self.redeem_key = Some(redeem_key);
        self.recovery_key = Some(recovery_key);

        self.install_locks(locks.buyer.clone(), locks.seller.clone())?;
        log::info!(
            "Accepted proposal: {} {} for {} {}, buyer lock until {}",
            proposal.buyer.amount,
            proposal.buyer.crypto.ticker(),
            proposal.seller.amount,
            proposal.seller.crypto.ticker(),
            buyer_locktime
        );
        Ok(locks)
    }

    /// Check the seller's locks against our terms and keys, then install them.
    pub fn set_locks(&mut self, locks: &Locks) -> Result<(), TradeError> {
        if self.role != Role::Buyer {
            return Err(TradeError::Usage("only the buyer receives locks"));
        }
        if self.locks_installed() {
            return Err(TradeError::Usage("locks already set"));
        }
        let own = self.own_info.ok_or(TradeError::Usage("trade has no own info"))?;
        let trader = self
            .trader_info
            .ok_or(TradeError::Usage("trade has no trader info"))?;
        let token_hash = self
            .token_hash
            .ok_or(TradeError::Usage("token is not generated"))?;
        let (redeem_key_data, recovery_key_data) = match (&self.redeem_key, &self.recovery_key) {
            (Some(redeem), Some(recovery)) => (redeem.key_data(), recovery.key_data()),
            _ => return Err(TradeError::Usage("keys are not generated")),
        };

        let buyer = locks.buyer.lock_data()?;
        let seller = locks.seller.lock_data()?;

        let half = self.duration.as_secs() / 2;
        let interval = buyer.locktime as i64 - seller.locktime as i64;
        if interval != half as i64 {
            return Err(TradeError::InvalidLockInterval {
                expected: half,
                got: interval,
            });
        }
        if buyer.token_hash != token_hash || seller.token_hash != token_hash {
            return Err(TradeError::MismatchTokenHash);
        }
        if buyer.recovery_key_hash != recovery_key_data
            || seller.redeem_key_hash != redeem_key_data
        {
            return Err(TradeError::MismatchKeyData);
        }
        for (lock, expected) in [(&locks.buyer, own.crypto), (&locks.seller, trader.crypto)] {
            if lock.crypto() != expected {
                return Err(TradeError::MismatchCrypto {
                    expected,
                    got: lock.crypto(),
                });
            }
        }

        self.install_locks(locks.buyer.clone(), locks.seller.clone())?;
        log::info!(
            "Locks accepted, ours until {}, theirs until {}",
            buyer.locktime,
            seller.locktime
        );
        Ok(())
    }

    fn install_locks(&mut self, buyer: Lock, seller: Lock) -> Result<(), TradeError> {
        let (own, trader) = match self.role {
            Role::Buyer => (buyer, seller),
            Role::Seller => (seller, buyer),
        };
        self.recoverable_funds
            .as_mut()
            .ok_or(TradeError::Usage("trade has no recoverable funds"))?
            .set_lock(own)?;
        self.redeemable_funds
            .as_mut()
            .ok_or(TradeError::Usage("trade has no redeemable funds"))?
            .set_lock(trader)
    }

    /// The installed locks, as exchanged in the proposal response.
    pub fn locks(&self) -> Result<Locks, TradeError> {
        let own = self
            .recoverable_funds
            .as_ref()
            .ok_or(TradeError::Usage("trade has no recoverable funds"))?
            .require_lock()?
            .clone();
        let trader = self
            .redeemable_funds
            .as_ref()
            .ok_or(TradeError::Usage("trade has no redeemable funds"))?
            .require_lock()?
            .clone();
        Ok(match self.role {
            Role::Buyer => Locks {
                buyer: own,
                seller: trader,
            },
            Role::Seller => Locks {
                buyer: trader,
                seller: own,
            },
        })
    }
}
