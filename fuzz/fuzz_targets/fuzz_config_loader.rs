#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = feedcart_config::load_toml(data) {
        let _ = cfg.validate();
        let _ = cfg.wireless.candidates();
    }
});
