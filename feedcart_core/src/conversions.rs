//! Bridges from `feedcart_config` sections to runtime types.
//!
//! Core-owned types get `From` impls; hardware types are foreign here, so they
//! are built by plain functions.
use std::time::Duration;

use feedcart_hardware::{ChannelCalibration, ChannelPins, SimulatedSource, WiredCfg};

use crate::manager::ManagerCfg;

// ── ManagerCfg ───────────────────────────────────────────────────────────────

impl From<&feedcart_config::Manager> for ManagerCfg {
    fn from(c: &feedcart_config::Manager) -> Self {
        Self {
            cache_ttl: Duration::from_millis(c.cache_ms),
            error_threshold: c.error_threshold,
        }
    }
}

// ── Wired array ──────────────────────────────────────────────────────────────

pub fn wired_cfg(c: &feedcart_config::Wired) -> WiredCfg {
    WiredCfg {
        read_timeout: Duration::from_millis(c.read_timeout_ms),
        tare_samples: c.tare_samples,
        confirm_timeout: Duration::from_millis(c.tare_confirm_timeout_ms),
    }
}

pub fn channel_layout(c: &feedcart_config::Wired) -> Vec<(ChannelPins, ChannelCalibration)> {
    c.channels
        .iter()
        .map(|ch| {
            (
                ChannelPins {
                    dt: ch.hx711_dt,
                    sck: ch.hx711_sck,
                    gain_pulses: ch.gain_pulses,
                },
                ChannelCalibration {
                    zero_counts: ch.zero_counts,
                    kg_per_count: ch.kg_per_count,
                },
            )
        })
        .collect()
}

// ── Simulator ────────────────────────────────────────────────────────────────

pub fn simulator(c: &feedcart_config::Simulation) -> SimulatedSource {
    let base = match c.seed {
        Some(seed) => SimulatedSource::with_seed(seed),
        None => SimulatedSource::new(),
    };
    base.with_noise(c.noise_kg).with_load(c.initial_load_kg)
}
