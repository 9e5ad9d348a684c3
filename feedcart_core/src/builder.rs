//! Builder for `WeightManager`.
//!
//! Every part is optional: without hardware the manager starts in simulation,
//! without a simulator it uses an unseeded one with default noise, without a
//! clock it uses the monotonic system clock.
use std::sync::Arc;
use std::time::Duration;

use feedcart_hardware::SimulatedSource;
use feedcart_traits::WeightSource;
use feedcart_traits::clock::{Clock, MonotonicClock};

use crate::error::{BuildError, Result};
use crate::manager::{DynSource, ManagerCfg, WeightManager};

/// Longest cache TTL the manager accepts.
const MAX_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct WeightManagerBuilder {
    hardware: Option<DynSource>,
    simulator: Option<SimulatedSource>,
    clock: Option<Arc<dyn Clock>>,
    cfg: Option<ManagerCfg>,
}

impl WeightManagerBuilder {
    /// The wired array or wireless source probed at detection time.
    pub fn with_hardware(mut self, source: impl WeightSource + Send + 'static) -> Self {
        self.hardware = Some(Box::new(source));
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatedSource) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_config(mut self, cfg: impl Into<ManagerCfg>) -> Self {
        self.cfg = Some(cfg.into());
        self
    }

    /// Validate and construct. Hardware detection runs here, once.
    pub fn build(self) -> Result<WeightManager> {
        let cfg = self.cfg.unwrap_or_default();
        if cfg.cache_ttl > MAX_CACHE_TTL {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "cache ttl must be <= 60 s",
            )));
        }
        let clock: Arc<dyn Clock> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };
        Ok(WeightManager::from_parts(
            cfg,
            clock,
            self.hardware,
            self.simulator.unwrap_or_default(),
        ))
    }
}
