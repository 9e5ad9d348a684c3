//! `WeightManager`: the one place the rest of the cart asks for a weight.
//!
//! The manager owns the state and the sources. It does no background work:
//! every read happens on the caller's thread and observers are notified after
//! the state is committed. Wireless pushes enter through
//! [`WeightManager::ingest_sample`] on the link worker's thread, so
//! `current_weight` has two writers; the last one wins and each write is
//! counted in `update_seq`.
//!
//! Two locks: `sources` serialises source I/O and mode switches, `inner`
//! guards the state. Lock order is `sources` then `inner`. The push path only
//! takes `inner`, so a source call that waits on the link worker (wireless
//! tare or calibrate) never blocks the pushes arriving ahead of its reply.
use std::cell::Cell;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::{Duration, Instant};

use feedcart_hardware::SimulatedSource;
use feedcart_traits::{CELL_COUNT, Clock, SourceKind, WeightSample, WeightSource};
use tracing::{debug, error, info, warn};

use crate::builder::WeightManagerBuilder;
use crate::error::WeightError;
use crate::hw_error::map_source_error;
use crate::state::{Mode, StatusSnapshot, WeightState, Writer};
use crate::util::{fixed_cells, non_negative};

/// Callback receiving every newly committed weight (kg).
pub type WeightObserver = Arc<dyn Fn(f64) + Send + Sync>;

/// A hardware-side source as the manager stores it.
pub type DynSource = Box<dyn WeightSource + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerCfg {
    /// Reads younger than this are served from the cache when asked to.
    pub cache_ttl: Duration,
    /// Consecutive failures tolerated before demoting to simulation.
    pub error_threshold: u32,
}

impl Default for ManagerCfg {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(100),
            error_threshold: 3,
        }
    }
}

thread_local! {
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

struct Sources {
    hardware: Option<DynSource>,
    simulator: SimulatedSource,
}

impl Sources {
    fn active(&mut self, mode: Mode) -> &mut dyn WeightSource {
        match (mode, self.hardware.as_mut()) {
            (Mode::Hardware, Some(hw)) => hw.as_mut(),
            _ => &mut self.simulator,
        }
    }
}

fn read_total(source: &mut dyn WeightSource) -> Result<f64, WeightError> {
    match source.read_total() {
        Ok(kg) => non_negative(kg)
            .ok_or_else(|| WeightError::InvalidReading(format!("non-finite total {kg}"))),
        Err(e) => Err(map_source_error(&*e)),
    }
}

struct Inner {
    state: WeightState,
    /// Kind of the hardware source, if one was supplied.
    hardware_kind: Option<SourceKind>,
    cached_at: Option<Instant>,
}

impl Inner {
    fn interface(&self) -> &'static str {
        match (self.state.mode, self.hardware_kind) {
            (Mode::Hardware, Some(kind)) => kind.as_str(),
            _ => SourceKind::Simulated.as_str(),
        }
    }

    fn commit_poll(&mut self, kg: f64, now: Instant) {
        self.state.commit(kg, Writer::Poll);
        self.cached_at = Some(now);
    }
}

pub struct WeightManager {
    sources: Mutex<Sources>,
    inner: Mutex<Inner>,
    observers: Mutex<BTreeMap<String, WeightObserver>>,
    /// Serialises observer fan-out; never held together with `inner`.
    notify_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    cfg: ManagerCfg,
}

impl core::fmt::Debug for WeightManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("WeightManager")
            .field("current_weight", &inner.state.current_weight)
            .field("mode", &inner.state.mode)
            .field("interface", &inner.interface())
            .finish()
    }
}

impl WeightManager {
    pub fn builder() -> WeightManagerBuilder {
        WeightManagerBuilder::default()
    }

    /// Probe the hardware source exactly once and pick the starting mode.
    pub(crate) fn from_parts(
        cfg: ManagerCfg,
        clock: Arc<dyn Clock>,
        mut hardware: Option<DynSource>,
        simulator: SimulatedSource,
    ) -> Self {
        let hardware_available = match hardware.as_mut() {
            Some(hw) => {
                let responsive = hw.probe();
                info!(source = %hw.kind(), responsive, "hardware detection");
                responsive > 0
            }
            None => {
                info!("no hardware source configured");
                false
            }
        };
        if !hardware_available {
            info!("starting in simulation mode");
        }
        let hardware_kind = hardware.as_ref().map(|hw| hw.kind());
        Self {
            sources: Mutex::new(Sources {
                hardware,
                simulator,
            }),
            inner: Mutex::new(Inner {
                state: WeightState::new(hardware_available),
                hardware_kind,
                cached_at: None,
            }),
            observers: Mutex::new(BTreeMap::new()),
            notify_lock: Mutex::new(()),
            clock,
            cfg,
        }
    }

    fn lock_sources(&self) -> MutexGuard<'_, Sources> {
        self.sources.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sources for a read. From inside an observer (possibly on the link
    /// worker while a caller waits on it) a busy lock yields `None`.
    fn sources_for_read(&self) -> Option<MutexGuard<'_, Sources>> {
        if !NOTIFYING.get() {
            return Some(self.lock_sources());
        }
        match self.sources.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_observers(&self) -> MutexGuard<'_, BTreeMap<String, WeightObserver>> {
        self.observers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mode_now(&self) -> Mode {
        self.lock_inner().state.mode
    }

    pub fn cfg(&self) -> ManagerCfg {
        self.cfg
    }

    /// Current weight in kg, never negative.
    ///
    /// With `use_cache`, a value read less than the cache TTL ago is returned
    /// without I/O. A failed read keeps the last valid value; once failures
    /// exceed the threshold in hardware mode the manager switches to
    /// simulation and reads once more from there. Called from an observer
    /// while another caller is using the sources, it returns the current value.
    pub fn read_weight(&self, use_cache: bool) -> f64 {
        let (weight, committed) = {
            let Some(mut sources) = self.sources_for_read() else {
                return self.lock_inner().state.current_weight;
            };
            let now = self.clock.now();
            let mode = {
                let inner = self.lock_inner();
                if use_cache
                    && let Some(at) = inner.cached_at
                    && now.saturating_duration_since(at) < self.cfg.cache_ttl
                {
                    return inner.state.current_weight;
                }
                inner.state.mode
            };

            match read_total(sources.active(mode)) {
                Ok(kg) => {
                    self.lock_inner().commit_poll(kg, now);
                    (kg, true)
                }
                Err(err) => {
                    let mut inner = self.lock_inner();
                    inner.state.record_failure(err.to_string());
                    warn!(
                        error = %err,
                        error_count = inner.state.error_count,
                        source = inner.interface(),
                        "weight read failed"
                    );
                    if inner.state.mode == Mode::Hardware
                        && inner.state.error_count > self.cfg.error_threshold
                    {
                        warn!(
                            error_count = inner.state.error_count,
                            "sustained read failures, switching to simulation"
                        );
                        inner.state.mode = Mode::Simulation;
                        inner.cached_at = None;
                        match read_total(&mut sources.simulator) {
                            Ok(kg) => {
                                inner.commit_poll(kg, now);
                                (kg, true)
                            }
                            Err(err) => {
                                inner.state.record_failure(err.to_string());
                                (inner.state.current_weight, false)
                            }
                        }
                    } else {
                        (inner.state.current_weight, false)
                    }
                }
            }
        };
        if committed {
            self.notify(weight);
        }
        weight
    }

    /// Per-corner load in kg. Zero-filled when the source cannot answer.
    pub fn read_individual_cells(&self) -> [f64; CELL_COUNT] {
        let Some(mut sources) = self.sources_for_read() else {
            return [0.0; CELL_COUNT];
        };
        let mode = self.mode_now();
        match sources.active(mode).read_cells() {
            Ok(cells) => fixed_cells::<CELL_COUNT>(&cells),
            Err(e) => {
                debug!(error = %map_source_error(&*e), "cell read failed");
                [0.0; CELL_COUNT]
            }
        }
    }

    /// Switch between simulation and hardware. Leaving simulation requires
    /// detected hardware. Returns the mode now in effect.
    pub fn set_simulation_mode(&self, enabled: bool) -> Mode {
        let _sources = self.lock_sources();
        let mut inner = self.lock_inner();
        if enabled {
            if inner.state.mode != Mode::Simulation {
                info!("switched to simulation mode");
            }
            inner.state.mode = Mode::Simulation;
        } else if inner.state.hardware_available {
            if inner.state.mode != Mode::Hardware {
                info!(source = inner.interface(), "switched to hardware mode");
            }
            inner.state.mode = Mode::Hardware;
            inner.state.error_count = 0;
        } else {
            warn!("hardware not available, staying in simulation mode");
        }
        inner.cached_at = None;
        inner.state.mode
    }

    pub fn mode(&self) -> Mode {
        self.mode_now()
    }

    /// Register `callback` under `name`; an existing entry with that name is replaced.
    pub fn register_observer(
        &self,
        name: impl Into<String>,
        callback: impl Fn(f64) + Send + Sync + 'static,
    ) {
        let name = name.into();
        debug!(observer = %name, "observer registered");
        self.lock_observers().insert(name, Arc::new(callback));
    }

    /// Returns whether an observer was registered under `name`.
    pub fn unregister_observer(&self, name: &str) -> bool {
        let removed = self.lock_observers().remove(name).is_some();
        if removed {
            debug!(observer = %name, "observer removed");
        }
        removed
    }

    /// Zero the active source. In simulation this empties the simulated cart.
    pub fn tare_weight(&self) -> bool {
        let mut sources = self.lock_sources();
        let mode = self.mode_now();
        let ok = sources.active(mode).tare();
        let mut inner = self.lock_inner();
        if ok {
            inner.cached_at = None;
            info!(source = inner.interface(), "tare complete");
        } else {
            warn!(source = inner.interface(), "tare failed");
        }
        ok
    }

    /// Rescale the active source so the current load reads `known_kg`.
    pub fn calibrate(&self, known_kg: f64) -> bool {
        if !(known_kg.is_finite() && known_kg > 0.0) {
            warn!(known_kg, "calibration weight must be positive");
            return false;
        }
        let mut sources = self.lock_sources();
        let mode = self.mode_now();
        let ok = sources.active(mode).calibrate(known_kg);
        let mut inner = self.lock_inner();
        if ok {
            inner.cached_at = None;
            info!(source = inner.interface(), known_kg, "calibration complete");
        } else {
            warn!(source = inner.interface(), known_kg, "calibration failed");
        }
        ok
    }

    /// Add (or with a negative delta, remove) simulated load. Only in simulation.
    pub fn simulate_weight_change(&self, delta_kg: f64) -> bool {
        let mut sources = self.lock_sources();
        let mut inner = self.lock_inner();
        if inner.state.mode != Mode::Simulation {
            warn!(delta_kg, "weight change ignored outside simulation mode");
            return false;
        }
        if !delta_kg.is_finite() {
            warn!(delta_kg, "weight change must be finite");
            return false;
        }
        let load = sources.simulator.add_load(delta_kg);
        inner.cached_at = None;
        debug!(delta_kg, load, "simulated load changed");
        true
    }

    /// Load the simulator currently holds, without noise.
    pub fn simulated_load_kg(&self) -> f64 {
        self.lock_sources().simulator.load_kg()
    }

    pub fn get_status(&self) -> StatusSnapshot {
        let (state, interface) = {
            let inner = self.lock_inner();
            (inner.state.clone(), inner.interface())
        };
        let observers_count = self.lock_observers().len();
        StatusSnapshot::from_state(&state, interface, observers_count)
    }

    /// Push-path entry: commit a wireless sample and notify observers.
    /// Returns false if the sample's total is not a number.
    pub fn ingest_sample(&self, sample: &WeightSample) -> bool {
        let Some(kg) = non_negative(sample.total_kg) else {
            warn!(total_kg = sample.total_kg, "ignoring non-finite pushed weight");
            return false;
        };
        self.lock_inner().state.commit(kg, Writer::Push);
        self.notify(kg);
        true
    }

    /// Callback forwarding pushes into [`Self::ingest_sample`] while the manager is alive.
    pub fn sample_sink(self: &Arc<Self>) -> impl Fn(&WeightSample) + Send + Sync + 'static {
        let manager: Weak<Self> = Arc::downgrade(self);
        move |sample| {
            if let Some(manager) = manager.upgrade() {
                manager.ingest_sample(sample);
            }
        }
    }

    fn notify(&self, weight: f64) {
        if NOTIFYING.get() {
            debug!("nested weight notification skipped");
            return;
        }
        let _serial = self.notify_lock.lock().unwrap_or_else(|p| p.into_inner());
        let observers: Vec<(String, WeightObserver)> = self
            .lock_observers()
            .iter()
            .map(|(name, o)| (name.clone(), o.clone()))
            .collect();
        NOTIFYING.set(true);
        for (name, observer) in &observers {
            if catch_unwind(AssertUnwindSafe(|| (**observer)(weight))).is_err() {
                error!(observer = %name, "weight observer panicked");
            }
        }
        NOTIFYING.set(false);
    }
}
