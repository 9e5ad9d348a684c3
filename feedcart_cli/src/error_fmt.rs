//! Human-readable error descriptions and structured JSON error formatting.

use feedcart_core::error::{BuildError, WeightError};
use serde_json::json;

/// Failures the CLI reports with their own exit code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("tare was not confirmed by the scale")]
    TareFailed,
    #[error("calibration was rejected by the scale")]
    CalibrationFailed,
    #[error("no wireless scale node answered discovery")]
    NodeNotFound,
    #[error("the manager is not in simulation mode")]
    NotInSimulation,
}

impl CliError {
    pub fn name(&self) -> &'static str {
        match self {
            CliError::InvalidConfig(_) => "InvalidConfig",
            CliError::TareFailed => "TareFailed",
            CliError::CalibrationFailed => "CalibrationFailed",
            CliError::NodeNotFound => "NodeNotFound",
            CliError::NotInSimulation => "NotInSimulation",
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::InvalidConfig(msg) if msg.contains("calibration CSV must have headers") => {
                "Invalid headers in calibration CSV. Expected 'channel,zero_counts,kg_per_count'."
                    .to_string()
            }
            CliError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML or calibration CSV.\nHow to fix: Edit the file named above, then rerun."
            ),
            CliError::TareFailed => "What happened: Tare did not complete.\nLikely causes: A load cell channel did not answer, or the wireless node rejected or never acknowledged the command.\nHow to fix: Empty the cart, check the wiring or WiFi link, and run `feedcart tare` again.".to_string(),
            CliError::CalibrationFailed => "What happened: Calibration was not applied.\nLikely causes: The cart reads ~0 kg (tare first, then load the known weight), or the node rejected the command.\nHow to fix: Put the known weight on the cart and rerun with a positive --known-kg.".to_string(),
            CliError::NodeNotFound => "What happened: No wireless scale node answered.\nLikely causes: The node is powered off, on another network, or reports a different device_name.\nHow to fix: Check [wireless] subnet_prefix/host range/identity, or join the node's access point.".to_string(),
            CliError::NotInSimulation => "What happened: Simulated load can only change in simulation mode.\nLikely causes: Real hardware was detected.\nHow to fix: Rerun with --simulate.".to_string(),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        let BuildError::InvalidConfig(msg) = be;
        return format!(
            "What happened: Invalid manager configuration ({msg}).\nLikely causes: Out-of-range values in the [manager] section.\nHow to fix: Edit the config file, then rerun."
        );
    }

    if let Some(we) = err.downcast_ref::<WeightError>() {
        if matches!(we, WeightError::Timeout) {
            return "What happened: Scale read timed out.\nLikely causes: HX711 not wired correctly, no power/ground, or timeout too low.\nHow to fix: Verify DT/SCK pins and power, and consider increasing wired.read_timeout_ms in the config.".to_string();
        }
        return format!(
            "What happened: {we}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("hardware` feature") {
        return "What happened: Wired load cells requested, but this build has no GPIO driver.\nLikely causes: Built without `--features hardware`.\nHow to fix: Rebuild with the hardware feature on the cart's Linux board, or use --simulate.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes; clap usage errors keep their own code 2.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::TareFailed) => 3,
        Some(CliError::CalibrationFailed) => 4,
        Some(CliError::NodeNotFound) => 5,
        Some(CliError::NotInSimulation) => 6,
        Some(CliError::InvalidConfig(_)) => 7,
        None if err.downcast_ref::<BuildError>().is_some() => 7,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let reason = err
        .downcast_ref::<CliError>()
        .map_or("Error", CliError::name);
    json!({
        "reason": reason,
        "code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
