//! Weight source drivers: the wired load-cell array and the simulated cart.
//!
//! The HX711 bit-bang driver is only compiled with the `hardware` feature on
//! Linux; everything else builds anywhere.
pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod hx711;
pub mod simulated;
pub mod util;
pub mod wired;

pub use error::HwError;
pub use simulated::SimulatedSource;
pub use wired::{ChannelCalibration, WiredArray, WiredCfg};

/// Pin assignment for one HX711 channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPins {
    pub dt: u8,
    pub sck: u8,
    pub gain_pulses: u8,
}

/// Open every configured HX711 channel and assemble the wired array.
///
/// Fails if any channel cannot claim its pins; detection treats that as
/// "no wired hardware".
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open_wired_array(
    channels: &[(ChannelPins, ChannelCalibration)],
    cfg: WiredCfg,
) -> error::Result<WiredArray> {
    let mut array = WiredArray::new(cfg);
    for (pins, cal) in channels {
        let cell = hx711::Hx711::open(pins.dt, pins.sck, pins.gain_pulses)?;
        tracing::debug!(dt = pins.dt, sck = pins.sck, "hx711 channel opened");
        array = array.with_channel(cell, *cal);
    }
    Ok(array)
}

/// Without the `hardware` feature there is no wired driver to open.
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open_wired_array(
    _channels: &[(ChannelPins, ChannelCalibration)],
    _cfg: WiredCfg,
) -> error::Result<WiredArray> {
    Err(HwError::Gpio(
        "built without the `hardware` feature".to_string(),
    ))
}
