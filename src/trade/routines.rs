//! Stage handlers talking to the counterparty and the chains.
//!
//! Each constructor returns a closure to install on a [super::Handler]. Handlers are
//! written to be run again after an interrupt or a crash: locking checks for recorded
//! outputs first and watchers continue from the persisted scan height.

use crate::{
    crypto::{Chain, KeyData},
    protocol::{Exchanger, TradeMessage},
    tx::Fee,
    watch::{watch_deposits, watch_redeem, ChainClient, Interrupt, WatchConfig, Watched},
};

use super::{error::TradeError, handler::StageResult, Output, Trade};

/// Buyer: send the proposal built from the trade's terms, token hash and keys.
pub fn send_proposal<'a>(
    exchanger: &'a dyn Exchanger,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        let proposal = trade.generate_buy_proposal()?;
        exchanger.send(&TradeMessage::BuyProposal(proposal))?;
        Ok(StageResult::Complete)
    }
}

/// Seller: take the buyer's proposal and build both locks.
///
/// `buyer_client` follows the buyer's chain. Its tip at acceptance is where the watch
/// for the buyer's deposit starts.
pub fn receive_proposal<'a>(
    exchanger: &'a dyn Exchanger,
    buyer_client: &'a dyn ChainClient,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| match exchanger.receive()? {
        TradeMessage::BuyProposal(proposal) => {
            let tip = buyer_client.block_count()?;
            trade.accept_buy_proposal(&proposal)?;
            start_deposit_scan(trade, tip)?;
            Ok(StageResult::Complete)
        }
        _ => Err(TradeError::UnexpectedMessage("expected a buy proposal")),
    }
}

/// Seller: answer with the locks.
pub fn send_proposal_response<'a>(
    exchanger: &'a dyn Exchanger,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        exchanger.send(&TradeMessage::Locks(trade.locks()?))?;
        Ok(StageResult::Complete)
    }
}

/// Buyer: check and install the seller's locks.
///
/// The seller deposits on the chain `seller_client` follows, after the locks are agreed.
pub fn receive_proposal_response<'a>(
    exchanger: &'a dyn Exchanger,
    seller_client: &'a dyn ChainClient,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| match exchanger.receive()? {
        TradeMessage::Locks(locks) => {
            let tip = seller_client.block_count()?;
            trade.set_locks(&locks)?;
            start_deposit_scan(trade, tip)?;
            Ok(StageResult::Complete)
        }
        _ => Err(TradeError::UnexpectedMessage("expected locks")),
    }
}

/// The counterparty's deposit cannot predate the agreed locks.
fn start_deposit_scan(trade: &mut Trade, tip: u64) -> Result<(), TradeError> {
    let funds = trade
        .redeemable_funds_mut()
        .ok_or(TradeError::Usage("trade has no redeemable funds"))?;
    if funds.scan_height().is_none() {
        funds.set_scan_height(tip);
    }
    Ok(())
}

/// Pay our amount from the node wallet to our lock and record the output.
///
/// Does nothing when an output is already recorded.
pub fn lock_funds<'a>(
    client: &'a dyn ChainClient,
    chain: Chain,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        let amount = trade
            .own_info()
            .ok_or(TradeError::Usage("trade has no own info"))?
            .amount;
        let funds = trade
            .recoverable_funds_mut()
            .ok_or(TradeError::Usage("trade has no recoverable funds"))?;
        if !funds.outputs().is_empty() {
            log::warn!("Funds already locked in {}", funds.outputs()[0].txid);
            return Ok(StageResult::Complete);
        }
        let lock = funds.require_lock()?;
        let address = lock.address(chain)?;
        let script_pubkey = lock.script_pubkey();

        // Redeems of this lock can only appear after the deposit.
        if funds.scan_height().is_none() {
            funds.set_scan_height(client.block_count()?);
        }

        let txid = client.send_to_address(&address, amount)?;
        let tx = client.transaction(&txid)?;
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.script == script_pubkey {
                funds.add_funds(Output {
                    txid: tx.txid.clone(),
                    index: index as u32,
                    amount: output.amount,
                });
            }
        }
        if funds.outputs().is_empty() {
            return Err(TradeError::Usage("funding transaction does not pay the lock"));
        }
        log::info!("Locked {} {} at {}", amount, funds.crypto().ticker(), address);
        Ok(StageResult::Complete)
    }
}

/// Wait until the counterparty's lock holds the agreed amount.
pub fn wait_locked_funds<'a>(
    client: &'a dyn ChainClient,
    config: WatchConfig,
    interrupt: Interrupt,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        let target = trade
            .trader_info()
            .ok_or(TradeError::Usage("trade has no trader info"))?
            .amount;
        let funds = trade
            .redeemable_funds_mut()
            .ok_or(TradeError::Usage("trade has no redeemable funds"))?;
        match watch_deposits(client, funds, target, &config, &interrupt)? {
            Watched::Found(total) => {
                log::info!("Counterparty locked {}", total);
                Ok(StageResult::Complete)
            }
            Watched::Interrupted => Ok(StageResult::Interrupt),
        }
    }
}

/// Seller: wait for the buyer to redeem our lock and learn the token from it.
pub fn wait_funds_redeemed<'a>(
    client: &'a dyn ChainClient,
    config: WatchConfig,
    interrupt: Interrupt,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        let token_hash = *trade
            .token_hash()
            .ok_or(TradeError::Usage("trade has no token hash"))?;
        let funds = trade
            .recoverable_funds_mut()
            .ok_or(TradeError::Usage("trade has no recoverable funds"))?;
        match watch_redeem(client, funds, &token_hash, &config, &interrupt)? {
            Watched::Found(token) => {
                trade.set_token(token)?;
                Ok(StageResult::Complete)
            }
            Watched::Interrupted => Ok(StageResult::Interrupt),
        }
    }
}

/// Spend the counterparty's lock with the token to `destination`.
pub fn redeem_funds<'a>(
    client: &'a dyn ChainClient,
    destination: KeyData,
    fee: Fee,
) -> impl FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a {
    move |trade: &mut Trade| {
        let tx = trade.redeem_tx(&destination, fee)?;
        let txid = client.send_raw_transaction(&tx.serialize())?;
        log::info!("Broadcast redeem transaction {}", txid);
        Ok(StageResult::Complete)
    }
}

/// Abort path: spend our own lock back to `destination` once its locktime passed.
///
/// Returns the broadcast txid. Nodes reject the spend before the locktime.
pub fn recover_funds(
    trade: &Trade,
    client: &dyn ChainClient,
    destination: &KeyData,
    fee: Fee,
) -> Result<String, TradeError> {
    let tx = trade.recovery_tx(destination, fee)?;
    let txid = client.send_raw_transaction(&tx.serialize())?;
    log::info!("Broadcast recovery transaction {}", txid);
    Ok(txid)
}
