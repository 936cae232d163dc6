//! Drives a [Trade] through its stages with one handler per stage.
//!
//! Handlers are closures so the caller decides how each stage talks to the counterparty
//! and the chains. A handler returning [StageResult::Interrupt] leaves the trade at its
//! current stage, so the same trade can be persisted and handled again later.

use std::collections::HashMap;

use super::{error::TradeError, stages::Stage, Trade};

/// What a stage handler achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// The stage is finished and the trade moves on.
    Complete,
    /// The stage must run again later.
    Interrupt,
}

/// How [Handler::handle_trade] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Done,
    /// Stopped at the given stage, which has not completed.
    Interrupted(Stage),
}

pub type StageHandler<'a> = Box<dyn FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a>;

pub struct Handler<'a> {
    handlers: HashMap<Stage, StageHandler<'a>>,
}

impl Default for Handler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Handler<'a> {
    /// A handler knowing the stages that need nothing from outside the trade.
    pub fn new() -> Self {
        let mut handler = Handler {
            handlers: HashMap::new(),
        };
        handler.install(Stage::GenerateKeys, |trade| {
            trade.generate_keys()?;
            Ok(StageResult::Complete)
        });
        handler.install(Stage::GenerateToken, |trade| {
            trade.generate_token()?;
            Ok(StageResult::Complete)
        });
        handler.install(Stage::Done, |_| Ok(StageResult::Complete));
        handler
    }

    /// Install `handler` for `stage`, replacing any previous one.
    pub fn install<F>(&mut self, stage: Stage, handler: F)
    where
        F: FnMut(&mut Trade) -> Result<StageResult, TradeError> + 'a,
    {
        self.handlers.insert(stage, Box::new(handler));
    }

    pub fn handles(&self, stage: Stage) -> bool {
        self.handlers.contains_key(&stage)
    }

    /// Run stage handlers until the trade is done or a handler interrupts.
    ///
    /// Every remaining stage must have a handler before anything runs. An error leaves
    /// the trade at the failing stage.
    pub fn handle_trade(&mut self, trade: &mut Trade) -> Result<TradeOutcome, TradeError> {
        let unhandled: Vec<Stage> = trade
            .stager()
            .remaining()
            .filter(|stage| !self.handles(*stage))
            .collect();
        if !unhandled.is_empty() {
            return Err(TradeError::UnhandledStages(unhandled));
        }

        loop {
            let stage = trade.stage();
            let handler = self
                .handlers
                .get_mut(&stage)
                .ok_or_else(|| TradeError::UnhandledStages(vec![stage]))?;
            log::debug!("Handling stage {}", stage);
            match handler(trade)? {
                StageResult::Interrupt => {
                    log::info!("Trade interrupted at stage {}", stage);
                    return Ok(TradeOutcome::Interrupted(stage));
                }
                StageResult::Complete if stage == Stage::Done => return Ok(TradeOutcome::Done),
                StageResult::Complete => {
                    trade.next_stage();
                }
            }
        }
    }
}
