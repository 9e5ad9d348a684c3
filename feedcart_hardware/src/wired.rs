//! Array of directly wired load-cell channels summed into one cart weight.
use std::time::Duration;

use feedcart_traits::{LoadCell, SourceError, SourceKind, WeightSource};
use tracing::{debug, info, warn};

use crate::error::HwError;
use crate::util::{mean_counts, wait_until};

/// Hook standing in for the operator's "cart is empty, go ahead" prompt.
pub type TareConfirm = Box<dyn FnMut() -> bool + Send>;

const CONFIRM_POLL: Duration = Duration::from_millis(50);

/// Linear model for one channel: kg = (raw - zero_counts) * kg_per_count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    pub zero_counts: i32,
    pub kg_per_count: f64,
}

impl ChannelCalibration {
    pub fn to_kg(&self, raw: i32) -> f64 {
        (i64::from(raw) - i64::from(self.zero_counts)) as f64 * self.kg_per_count
    }
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            zero_counts: 0,
            kg_per_count: 1.0e-5,
        }
    }
}

struct Channel {
    cell: Box<dyn LoadCell + Send>,
    cal: ChannelCalibration,
}

/// Timing knobs for the array.
#[derive(Debug, Clone)]
pub struct WiredCfg {
    /// Max wait for one channel sample.
    pub read_timeout: Duration,
    /// Raw samples averaged per channel when capturing a tare offset.
    pub tare_samples: usize,
    /// How long tare waits for the confirmation hook.
    pub confirm_timeout: Duration,
}

impl Default for WiredCfg {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(150),
            tare_samples: 10,
            confirm_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WiredArray {
    channels: Vec<Channel>,
    cfg: WiredCfg,
    confirm: Option<TareConfirm>,
}

impl WiredArray {
    pub fn new(cfg: WiredCfg) -> Self {
        Self {
            channels: Vec::new(),
            cfg,
            confirm: None,
        }
    }

    /// Append a channel; channel indices follow insertion order.
    pub fn with_channel(
        mut self,
        cell: impl LoadCell + Send + 'static,
        cal: ChannelCalibration,
    ) -> Self {
        self.channels.push(Channel {
            cell: Box::new(cell),
            cal,
        });
        self
    }

    pub fn with_tare_confirm(mut self, confirm: impl FnMut() -> bool + Send + 'static) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn calibrations(&self) -> Vec<ChannelCalibration> {
        self.channels.iter().map(|c| c.cal).collect()
    }

    fn read_channel(&mut self, idx: usize) -> Result<f64, SourceError> {
        let timeout = self.cfg.read_timeout;
        let ch = &mut self.channels[idx];
        let raw = ch.cell.read(timeout)?;
        Ok(ch.cal.to_kg(raw))
    }

    /// Per-channel kilograms; `None` where the channel failed.
    fn sample_all(&mut self) -> Vec<Option<f64>> {
        (0..self.channels.len())
            .map(|idx| match self.read_channel(idx) {
                Ok(kg) if kg.is_finite() => Some(kg),
                Ok(kg) => {
                    warn!(channel = idx, value = kg, "non-finite channel reading");
                    None
                }
                Err(e) => {
                    warn!(channel = idx, error = %e, "load cell read failed");
                    None
                }
            })
            .collect()
    }

    fn capture_zero(&mut self, idx: usize) -> Option<i32> {
        let timeout = self.cfg.read_timeout;
        let samples = self.cfg.tare_samples.max(1);
        let ch = &mut self.channels[idx];
        let raws: Vec<i32> = (0..samples)
            .filter_map(|_| ch.cell.read(timeout).ok())
            .collect();
        mean_counts(&raws)
    }
}

impl WeightSource for WiredArray {
    fn kind(&self) -> SourceKind {
        SourceKind::Wired
    }

    fn read_total(&mut self) -> Result<f64, SourceError> {
        let cells = self.sample_all();
        if cells.iter().all(Option::is_none) {
            return Err(Box::new(HwError::NoResponsiveChannels));
        }
        let total: f64 = cells.into_iter().flatten().sum();
        Ok(total.max(0.0))
    }

    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError> {
        let cells = self.sample_all();
        if cells.iter().all(Option::is_none) {
            return Err(Box::new(HwError::NoResponsiveChannels));
        }
        Ok(cells.into_iter().map(|c| c.unwrap_or(0.0)).collect())
    }

    fn tare(&mut self) -> bool {
        if let Some(confirm) = self.confirm.as_mut() {
            let timeout = self.cfg.confirm_timeout;
            if wait_until(|| confirm(), timeout, CONFIRM_POLL).is_err() {
                let err = HwError::TareNotConfirmed(timeout.as_millis() as u64);
                warn!(error = %err, "tare aborted");
                return false;
            }
        }

        let mut all_ok = true;
        for idx in 0..self.channels.len() {
            match self.capture_zero(idx) {
                Some(zero) => {
                    debug!(channel = idx, zero_counts = zero, "captured tare offset");
                    self.channels[idx].cal.zero_counts = zero;
                }
                None => {
                    warn!(channel = idx, "tare failed, keeping previous offset");
                    all_ok = false;
                }
            }
        }
        all_ok && !self.channels.is_empty()
    }

    fn calibrate(&mut self, known_kg: f64) -> bool {
        if !(known_kg.is_finite() && known_kg > 0.0) {
            warn!(known_kg, "calibration weight must be positive");
            return false;
        }
        let cells = self.sample_all();
        if cells.iter().any(Option::is_none) {
            warn!("calibration needs every channel responding");
            return false;
        }
        let measured: f64 = cells.into_iter().flatten().sum();
        if measured.abs() < 1e-6 {
            warn!(measured, "calibration load not detected");
            return false;
        }
        let factor = known_kg / measured;
        for ch in &mut self.channels {
            ch.cal.kg_per_count *= factor;
        }
        info!(known_kg, measured, factor, "wired array calibrated");
        true
    }

    fn probe(&mut self) -> usize {
        let timeout = self.cfg.read_timeout;
        self.channels
            .iter_mut()
            .map(|ch| ch.cell.read(timeout).is_ok())
            .filter(|ok| *ok)
            .count()
    }
}
