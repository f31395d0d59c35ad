//! Delayed outcome simulator: stands in for gateway latency.
//!
//! Each scheduled payment gets a random delay and a verdict biased towards
//! SUCCESS, both drawn from seeded streams so a given seed always replays
//! the same sequence. After the delay a worker thread finalizes the payment
//! through its own store connection. The simulator decides nothing else:
//! if a webhook got there first, the finalizer simply reports the payment
//! as already final.

use crate::{
    config::SimulatorConfig,
    error::{LedgerError, LedgerResult},
    model::Outcome,
    rng::{LedgerRng, RngBank, RngStream},
    settlement_finalizer::{FinalizationResult, SettlementFinalizer},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One drawn simulation: when to fire and what to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedOutcome {
    pub delay: Duration,
    pub outcome: Outcome,
    pub external_ref: String,
}

pub struct OutcomeSimulator {
    finalizer: SettlementFinalizer,
    config: SimulatorConfig,
    delay_rng: LedgerRng,
    verdict_rng: LedgerRng,
    draws: u64,
}

impl OutcomeSimulator {
    pub fn new(finalizer: SettlementFinalizer, config: &SimulatorConfig) -> Self {
        let bank = RngBank::new(config.seed);
        Self {
            finalizer,
            config: config.clone(),
            delay_rng: bank.for_stream(RngStream::OutcomeDelay),
            verdict_rng: bank.for_stream(RngStream::OutcomeVerdict),
            draws: 0,
        }
    }

    pub fn draw(&mut self) -> SimulatedOutcome {
        self.draws += 1;
        let delay_ms = self
            .delay_rng
            .next_u64_between(self.config.min_delay_ms, self.config.max_delay_ms);
        let outcome = if self.verdict_rng.chance(self.config.success_probability) {
            Outcome::Success
        } else {
            Outcome::Failed
        };
        SimulatedOutcome {
            delay: Duration::from_millis(delay_ms),
            outcome,
            external_ref: format!("sim-{:x}-{}", self.config.seed, self.draws),
        }
    }

    /// Draw an outcome and apply it on the calling thread, skipping the delay.
    pub fn resolve_now(&mut self, payment_id: &str) -> LedgerResult<FinalizationResult> {
        let sim = self.draw();
        self.finalizer
            .finalize(payment_id, sim.outcome, Some(&sim.external_ref))
    }

    /// Draw an outcome and apply it from a worker thread once the delay
    /// elapses. Failures inside the worker are logged; the payment then
    /// stays PENDING for the webhook or a later recovery pass.
    pub fn schedule(&mut self, payment_id: &str) -> LedgerResult<JoinHandle<()>> {
        let sim = self.draw();
        let mut worker = self.finalizer.reopen()?;
        let payment_id = payment_id.to_string();
        log::debug!(
            "simulator: payment {payment_id} will resolve {} in {}ms",
            sim.outcome.as_str(),
            sim.delay.as_millis()
        );

        thread::Builder::new()
            .name(format!("outcome-sim-{}", self.draws))
            .spawn(move || {
                thread::sleep(sim.delay);
                match worker.finalize(&payment_id, sim.outcome, Some(&sim.external_ref)) {
                    Ok(r) if r.applied => {
                        log::debug!("simulator: payment {payment_id} resolved {}", r.payment.status)
                    }
                    Ok(r) => log::debug!(
                        "simulator: payment {payment_id} was already {}, nothing to do",
                        r.payment.status
                    ),
                    Err(e) => log::warn!(
                        "simulator: finalizing payment {payment_id} failed, left PENDING: {e}"
                    ),
                }
            })
            .map_err(|e| LedgerError::Other(anyhow::anyhow!("cannot spawn simulator task: {e}")))
    }

    /// Re-schedule every payment still PENDING. Simulator timers live only
    /// in memory, so a restart would otherwise strand them.
    pub fn recover_pending(&mut self) -> LedgerResult<Vec<JoinHandle<()>>> {
        let pending = self.finalizer.store().pending_payment_ids()?;
        if !pending.is_empty() {
            log::info!("simulator: recovering {} pending payments", pending.len());
        }
        pending.iter().map(|id| self.schedule(id)).collect()
    }
}
