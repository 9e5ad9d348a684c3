use std::time::Duration;
use tracing::{trace, warn};

use feedcart_traits::{LoadCell, SourceError};

use crate::error::{HwError, Result};
use crate::util::wait_until_low_with_timeout;

/// Poll interval while waiting for DT to go low.
const DATA_READY_POLL: Duration = Duration::from_micros(200);
/// Extra attempts after a data-ready timeout before a read is reported failed.
const TIMEOUT_RETRIES: u32 = 2;

/// One HX711 amplifier channel (one corner load cell).
pub struct Hx711 {
    dt: rppal::gpio::InputPin,
    sck: rppal::gpio::OutputPin,
    gain_pulses: u8, // 1 = A/128, 2 = B/32, 3 = A/64
}

impl Hx711 {
    pub fn new(
        dt_pin: rppal::gpio::InputPin,
        mut sck_pin: rppal::gpio::OutputPin,
        gain_pulses: u8,
    ) -> Result<Self> {
        sck_pin.set_low(); // clock idle low
        Ok(Self {
            dt: dt_pin,
            sck: sck_pin,
            gain_pulses,
        })
    }

    /// Claim the BCM pins for one channel.
    pub fn open(dt: u8, sck: u8, gain_pulses: u8) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let dt_pin = gpio
            .get(dt)
            .map_err(|e| HwError::Gpio(format!("open hx711 dt pin {dt}: {e}")))?
            .into_input();
        let sck_pin = gpio
            .get(sck)
            .map_err(|e| HwError::Gpio(format!("open hx711 sck pin {sck}: {e}")))?
            .into_output();
        Self::new(dt_pin, sck_pin, gain_pulses)
    }

    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<i32> {
        let dt = &self.dt;
        wait_until_low_with_timeout(|| dt.is_high(), timeout, DATA_READY_POLL)?;

        // Clock out 24 bits
        let mut value: i32 = 0;
        for _ in 0..24 {
            self.sck.set_high();
            spin_delay_100ns();
            value = (value << 1) | i32::from(self.dt.is_high());
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Pulse gain to set next measurement
        for _ in 0..self.gain_pulses {
            self.sck.set_high();
            spin_delay_100ns();
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Sign extend 24-bit
        if (value & 0x80_0000) != 0 {
            value |= !0xFF_FFFF;
        }
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }
}

impl LoadCell for Hx711 {
    fn read(&mut self, timeout: Duration) -> std::result::Result<i32, SourceError> {
        let mut attempts = 0;
        loop {
            match self.read_with_timeout(timeout) {
                Ok(raw) => return Ok(raw),
                Err(HwError::DataReadyTimeout) if attempts < TIMEOUT_RETRIES => {
                    attempts += 1;
                    warn!(retries = attempts, "hx711 timeout, retrying");
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
    }
}

#[inline(always)]
fn spin_delay_100ns() {
    std::hint::spin_loop();
}
