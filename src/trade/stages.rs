//! Protocol stages and the per-role sequence a trade walks through.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

use super::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    GenerateKeys,
    GenerateToken,
    SendProposal,
    ReceiveProposal,
    SendProposalResponse,
    ReceiveProposalResponse,
    LockFunds,
    WaitLockedFunds,
    WaitFundsRedeemed,
    RedeemFunds,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::GenerateKeys => "generate-keys",
            Stage::GenerateToken => "generate-token",
            Stage::SendProposal => "send-proposal",
            Stage::ReceiveProposal => "receive-proposal",
            Stage::SendProposalResponse => "send-proposal-response",
            Stage::ReceiveProposalResponse => "receive-proposal-response",
            Stage::LockFunds => "lock-funds",
            Stage::WaitLockedFunds => "wait-locked-funds",
            Stage::WaitFundsRedeemed => "wait-funds-redeemed",
            Stage::RedeemFunds => "redeem-funds",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// The buyer locks first, and redeems the seller's deposit by revealing the token.
pub const BUYER_STAGES: [Stage; 8] = [
    Stage::GenerateKeys,
    Stage::GenerateToken,
    Stage::SendProposal,
    Stage::ReceiveProposalResponse,
    Stage::LockFunds,
    Stage::WaitLockedFunds,
    Stage::RedeemFunds,
    Stage::Done,
];

/// The seller only locks after the buyer's deposit, and learns the token from the
/// buyer's redeem.
pub const SELLER_STAGES: [Stage; 7] = [
    Stage::ReceiveProposal,
    Stage::SendProposalResponse,
    Stage::WaitLockedFunds,
    Stage::LockFunds,
    Stage::WaitFundsRedeemed,
    Stage::RedeemFunds,
    Stage::Done,
];

/// Remaining stages of a trade. The front is the current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stager {
    stages: VecDeque<Stage>,
}

impl Stager {
    pub fn new(role: Role) -> Self {
        let stages = match role {
            Role::Buyer => BUYER_STAGES.iter().copied().collect(),
            Role::Seller => SELLER_STAGES.iter().copied().collect(),
        };
        Stager { stages }
    }

    pub fn stage(&self) -> Stage {
        self.stages.front().copied().unwrap_or(Stage::Done)
    }

    /// Move to the next stage and return it. Stays at [Stage::Done].
    pub fn next_stage(&mut self) -> Stage {
        if self.stage() != Stage::Done {
            self.stages.pop_front();
        }
        self.stage()
    }

    /// The current stage followed by every stage still to run.
    pub fn remaining(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().copied()
    }
}
