//! `WeightSource` view of a wireless link.
use std::sync::Arc;
use std::time::Duration;

use feedcart_traits::{SourceError, SourceKind, WeightSource};

use crate::error::LinkError;
use crate::link::WirelessLink;

/// Samples older than this are not reported as the current weight.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3);

/// Serves the latest pushed sample through the synchronous read path.
pub struct WirelessSource {
    link: Arc<WirelessLink>,
    stale_after: Duration,
}

impl WirelessSource {
    pub fn new(link: Arc<WirelessLink>) -> Self {
        Self {
            link,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn link(&self) -> &Arc<WirelessLink> {
        &self.link
    }

    fn fresh_sample(&self) -> Result<feedcart_traits::WeightSample, LinkError> {
        if !self.link.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let sample = self.link.latest_sample().ok_or(LinkError::NotConnected)?;
        let age = sample.age();
        if age > self.stale_after {
            return Err(LinkError::Stale(age.as_millis() as u64));
        }
        Ok(sample)
    }
}

impl WeightSource for WirelessSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Wireless
    }

    fn read_total(&mut self) -> Result<f64, SourceError> {
        let sample = self.fresh_sample()?;
        Ok(sample.total_kg.max(0.0))
    }

    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError> {
        let sample = self.fresh_sample()?;
        match sample.corner_kg {
            Some(corners) => Ok(corners.to_vec()),
            None => Err(Box::new(LinkError::NoCorners)),
        }
    }

    fn tare(&mut self) -> bool {
        self.link.tare()
    }

    fn calibrate(&mut self, known_kg: f64) -> bool {
        self.link.calibrate(known_kg)
    }

    fn probe(&mut self) -> usize {
        usize::from(self.link.is_connected())
    }
}
