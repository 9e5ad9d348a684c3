#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `feedcart`: operator CLI over the weight manager.

mod cli;
mod commands;
mod error_fmt;
mod logging;
mod setup;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use feedcart_config::Config;

use crate::cli::{Cli, Commands, DEFAULT_CONFIG, JSON_MODE};
use crate::error_fmt::{CliError, exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        tracing::error!(error = %format!("{err:#}"), "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref(), cli.calibration.as_deref())?;
    logging::init(cli.json, cli.log_level.as_deref(), &cfg.logging)?;

    // Discovery does not need a manager (and must not trigger one).
    if let Commands::Discover { force } = cli.cmd {
        return commands::discover(&cfg, cli.json, force);
    }

    // Only an interactive tare asks the operator to confirm the cart is empty.
    let confirm_tare =
        matches!(cli.cmd, Commands::Tare { yes: false }) && std::io::stdin().is_terminal();
    let cart = setup::assemble(&cfg, cli.simulate, confirm_tare)?;
    let json = cli.json;
    match cli.cmd {
        Commands::Read {
            count,
            interval_ms,
            no_cache,
        } => commands::read(&cart, json, count, interval_ms, no_cache),
        Commands::Cells => commands::cells(&cart, json),
        Commands::Tare { .. } => commands::tare(&cart, json)?,
        Commands::Calibrate { known_kg } => commands::calibrate(&cart, json, known_kg)?,
        Commands::Simulate { deltas } => commands::simulate(&cart, json, &deltas)?,
        Commands::Status => commands::status(&cart, json)?,
        Commands::Watch {
            interval_ms,
            max_updates,
        } => {
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = stop.clone();
                ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
                    .wrap_err("install Ctrl-C handler")?;
            }
            commands::watch(&cart, json, interval_ms, max_updates, &stop);
        }
        Commands::SelfCheck => commands::self_check(&cart, json),
        Commands::Discover { .. } => {}
    }
    Ok(())
}

/// Read, parse and validate the TOML config, then fold in calibration rows.
///
/// A missing default config means built-in defaults; an explicit `--config`
/// must exist.
fn load_config(path: Option<&Path>, calibration: Option<&Path>) -> eyre::Result<Config> {
    let mut cfg = match path {
        Some(p) => parse_config(p)?,
        None if Path::new(DEFAULT_CONFIG).exists() => parse_config(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };

    if let Some(csv) = calibration {
        let rows = feedcart_config::load_calibration_csv(csv)
            .map_err(|e| CliError::InvalidConfig(format!("{e:#}")))?;
        cfg.apply_calibration(&rows)
            .map_err(|e| CliError::InvalidConfig(format!("{e:#}")))?;
    }

    cfg.validate()
        .map_err(|e| CliError::InvalidConfig(format!("{e:#}")))?;
    Ok(cfg)
}

fn parse_config(path: &Path) -> eyre::Result<Config> {
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("read config {path:?}"))?;
    feedcart_config::load_toml(&text)
        .map_err(|e| CliError::InvalidConfig(format!("{}: {e}", path.display())).into())
}
