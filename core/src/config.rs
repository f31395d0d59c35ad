use crate::types::Amount;
use serde::{Deserialize, Serialize};

/// Longest delay the simulator may wait before reporting an outcome.
pub const MAX_SIMULATOR_DELAY_MS: u64 = 3_600_000;

/// Delayed outcome simulator: models gateway latency and verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub seed: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Probability that a simulated outcome is SUCCESS.
    pub success_probability: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: 42,
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
            success_probability: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Hard ceiling on a single payment, in minor units.
    pub max_payment_amount: Amount,
    /// Count other PENDING payments of the card against its outstanding
    /// balance when validating a new payment.
    pub reserve_pending_payments: bool,
    /// How long a writer waits for the database lock before giving up.
    pub busy_timeout_ms: u64,
    pub simulator: SimulatorConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_payment_amount: 100_000_000,
            reserve_pending_payments: true,
            busy_timeout_ms: 5_000,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: LedgerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payment_amount <= 0 {
            anyhow::bail!("max_payment_amount must be positive");
        }
        let sim = &self.simulator;
        if !(0.0..=1.0).contains(&sim.success_probability) {
            anyhow::bail!(
                "simulator.success_probability must be within [0, 1], got {}",
                sim.success_probability
            );
        }
        if sim.max_delay_ms > MAX_SIMULATOR_DELAY_MS {
            anyhow::bail!(
                "simulator.max_delay_ms ({}) exceeds the {MAX_SIMULATOR_DELAY_MS}ms limit",
                sim.max_delay_ms
            );
        }
        if sim.min_delay_ms > sim.max_delay_ms {
            anyhow::bail!(
                "simulator.min_delay_ms ({}) exceeds max_delay_ms ({})",
                sim.min_delay_ms,
                sim.max_delay_ms
            );
        }
        Ok(())
    }

    /// Config for tests: no simulator delay, always-successful verdicts.
    pub fn default_test() -> Self {
        Self {
            max_payment_amount: 10_000_000,
            reserve_pending_payments: true,
            busy_timeout_ms: 10_000,
            simulator: SimulatorConfig {
                enabled: false,
                seed: 7,
                min_delay_ms: 0,
                max_delay_ms: 0,
                success_probability: 1.0,
            },
        }
    }
}
