//! Deterministic random number generation.
//!
//! RULE: Nothing in the ledger may call a platform RNG for decisions that
//! affect settlement. All randomness flows through LedgerRng instances
//! derived from a single configured seed.
//!
//! Each consumer gets its own stream, seeded from (seed XOR stream index).
//! Adding a new stream never changes the draws of existing ones.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG stream.
pub struct LedgerRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl LedgerRng {
    /// Create a stream from the master seed and a stable stream index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, stream_index: u64) -> Self {
        let derived_seed = master_seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Roll a u64 in [lo, hi] inclusive. Collapses to `lo` when hi <= lo.
    pub fn next_u64_between(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        match (hi - lo).checked_add(1) {
            Some(span) => lo + self.next_u64_below(span),
            // [0, u64::MAX]: every value is in range.
            None => {
                use rand::RngCore;
                self.inner.next_u64()
            }
        }
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Hands out streams for one configured seed.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_stream(&self, stream: RngStream) -> LedgerRng {
        LedgerRng::new(self.master_seed, stream as u64).with_name(stream.name())
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngStream {
    OutcomeDelay = 0,
    OutcomeVerdict = 1,
}

impl RngStream {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OutcomeDelay => "outcome_delay",
            Self::OutcomeVerdict => "outcome_verdict",
        }
    }
}
