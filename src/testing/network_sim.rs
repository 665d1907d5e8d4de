//! Network condition simulation for testing

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Applies loss, duplication and reordering to a packet sequence
#[derive(Clone, Debug)]
pub struct NetworkSimulator {
    /// Packet loss probability (0.0 to 1.0)
    pub loss_rate: f64,
    /// Probability a packet is delivered twice
    pub duplicate_rate: f64,
    /// Probability a packet swaps places with the one after it
    pub reorder_rate: f64,
    rng: StdRng,
}

impl NetworkSimulator {
    fn with_rates(loss_rate: f64, duplicate_rate: f64, reorder_rate: f64) -> Self {
        Self {
            loss_rate,
            duplicate_rate,
            reorder_rate,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    /// Perfect network (no issues)
    #[must_use]
    pub fn perfect() -> Self {
        Self::with_rates(0.0, 0.0, 0.0)
    }

    /// Good `WiFi` conditions
    #[must_use]
    pub fn good_wifi() -> Self {
        Self::with_rates(0.001, 0.001, 0.001)
    }

    /// Poor `WiFi` conditions
    #[must_use]
    pub fn poor_wifi() -> Self {
        Self::with_rates(0.05, 0.02, 0.05)
    }

    /// Very poor conditions (stress test)
    #[must_use]
    pub fn stress_test() -> Self {
        Self::with_rates(0.10, 0.05, 0.10)
    }

    /// Reseed the random source
    #[must_use]
    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn chance(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }

    /// Should this packet be dropped?
    pub fn should_drop(&mut self) -> bool {
        let rate = self.loss_rate;
        self.chance(rate)
    }

    /// Should this packet be delivered twice?
    pub fn should_duplicate(&mut self) -> bool {
        let rate = self.duplicate_rate;
        self.chance(rate)
    }

    /// Should this packet be reordered?
    pub fn should_reorder(&mut self) -> bool {
        let rate = self.reorder_rate;
        self.chance(rate)
    }

    /// Deliver `packets` through the simulated network.
    pub fn deliver<T: Clone>(&mut self, packets: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut delivered = Vec::new();
        for packet in packets {
            if self.should_drop() {
                continue;
            }
            if self.should_duplicate() {
                delivered.push(packet.clone());
            }
            delivered.push(packet);
        }
        let mut i = 0;
        while i + 1 < delivered.len() {
            if self.should_reorder() {
                delivered.swap(i, i + 1);
                i += 2;
            } else {
                i += 1;
            }
        }
        delivered
    }
}
