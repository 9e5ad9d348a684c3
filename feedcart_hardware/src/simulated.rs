//! Simulated cart: a single load value plus read noise.
use feedcart_traits::{CELL_COUNT, SourceError, SourceKind, WeightSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Default per-read noise amplitude in kilograms.
pub const DEFAULT_NOISE_KG: f64 = 0.1;

pub struct SimulatedSource {
    load_kg: f64,
    noise_kg: f64,
    rng: StdRng,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            load_kg: 0.0,
            noise_kg: DEFAULT_NOISE_KG,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic noise sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Noise amplitude; negative or non-finite values disable noise.
    pub fn with_noise(mut self, noise_kg: f64) -> Self {
        self.noise_kg = if noise_kg.is_finite() {
            noise_kg.max(0.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_load(mut self, kg: f64) -> Self {
        self.set_load(kg);
        self
    }

    pub fn load_kg(&self) -> f64 {
        self.load_kg
    }

    pub fn set_load(&mut self, kg: f64) {
        self.load_kg = if kg.is_finite() { kg.max(0.0) } else { 0.0 };
    }

    /// Load the cart (positive) or feed out (negative); returns the new load.
    pub fn add_load(&mut self, delta_kg: f64) -> f64 {
        if delta_kg.is_finite() {
            self.set_load(self.load_kg + delta_kg);
        }
        debug!(delta_kg, load_kg = self.load_kg, "simulated load changed");
        self.load_kg
    }

    fn noise(&mut self) -> f64 {
        if self.noise_kg == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.noise_kg..=self.noise_kg)
    }
}

impl WeightSource for SimulatedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }

    fn read_total(&mut self) -> Result<f64, SourceError> {
        Ok((self.load_kg + self.noise()).max(0.0))
    }

    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError> {
        let share = self.load_kg / CELL_COUNT as f64;
        let noise_per_cell = CELL_COUNT as f64;
        Ok((0..CELL_COUNT)
            .map(|_| (share + self.noise() / noise_per_cell).max(0.0))
            .collect())
    }

    fn tare(&mut self) -> bool {
        self.load_kg = 0.0;
        true
    }

    fn calibrate(&mut self, _known_kg: f64) -> bool {
        true
    }

    fn probe(&mut self) -> usize {
        CELL_COUNT
    }
}
