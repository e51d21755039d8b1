//! The task runner.
//!
//! Walks one chain of tasks for one trade, sequentially, stopping at the
//! first failure. After every completed task the trade and its scratch
//! state are checkpointed, so a process restart resumes from the last
//! committed step. The runner never retries; re-dispatching a chain is the
//! caller's decision on the next matching trigger.

use crate::protocol::messages::TradeMessage;

use super::{
    chains::{chain_tasks, ChainId},
    store::TradeStore,
    tasks::{self, StepError, TradeContext},
};

/// Result of one chain run that did not fail.
#[derive(Debug)]
pub struct ChainOutcome {
    /// Messages the chain produced for the counterparty, in task order.
    pub outbound: Vec<TradeMessage>,
    /// True when a task declined to continue; the trade state must not
    /// advance past this chain.
    pub halted: bool,
}

/// Executes task chains against a trade, checkpointing progress.
pub struct TaskRunner<'a> {
    store: &'a TradeStore,
}

impl<'a> TaskRunner<'a> {
    /// A runner checkpointing into the given store.
    pub fn new(store: &'a TradeStore) -> Self {
        Self { store }
    }

    /// Runs every task of `chain` in order against the context.
    ///
    /// On failure the remaining tasks do not run, the failure is recorded
    /// on the trade (with a terminal state for fatal categories), the
    /// partial progress is checkpointed, and the error is returned to the
    /// caller.
    pub fn run_chain(
        &self,
        chain: ChainId,
        ctx: &mut TradeContext,
    ) -> Result<ChainOutcome, StepError> {
        log::debug!("[{}] Running chain {}", ctx.trade.id, chain);
        let mut outbound = Vec::new();
        for task in chain_tasks(chain) {
            match tasks::run(*task, ctx) {
                Ok(output) => {
                    if let Some(message) = output.outbound {
                        outbound.push(message);
                    }
                    self.store
                        .checkpoint(ctx.trade, ctx.model)
                        .map_err(|e| StepError::transient(format!("checkpoint failed: {e}")))?;
                    if output.halt {
                        log::warn!("[{}] Chain {} halted at {}", ctx.trade.id, chain, task);
                        return Ok(ChainOutcome {
                            outbound,
                            halted: true,
                        });
                    }
                }
                Err(error) => {
                    ctx.trade
                        .record_failure(format!("{task}: {}", error.context), error.is_fatal());
                    // Best effort: the failure itself should survive a restart.
                    if let Err(store_error) = self.store.checkpoint(ctx.trade, ctx.model) {
                        log::error!(
                            "[{}] Could not checkpoint failure: {}",
                            ctx.trade.id,
                            store_error
                        );
                    }
                    return Err(error);
                }
            }
        }
        Ok(ChainOutcome {
            outbound,
            halted: false,
        })
    }
}
