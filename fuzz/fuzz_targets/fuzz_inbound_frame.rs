#![no_main]
use std::time::SystemTime;

use feedcart_wireless::InboundMessage;
use feedcart_wireless::protocol::{Command, decode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(msg) = decode(data) else {
        return;
    };
    for cmd in [Command::Tare, Command::Calibrate { weight: 1.0 }, Command::GetStatus] {
        let _ = cmd.is_answered_by(&msg);
    }
    if let InboundMessage::WeightData(push) = msg {
        let sample = push.into_sample(SystemTime::now());
        assert!(sample.corner_kg.is_none_or(|c| c.len() == 4));
    }
});
