//! Subcommand handlers. Results go to stdout, as text or one JSON object per line.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use feedcart_config::Config;
use feedcart_core::{Mode, WeightManager};
use feedcart_wireless::Discovery;
use serde_json::json;
use tracing::info;

use crate::error_fmt::CliError;
use crate::setup::{Cart, discovery_cfg};

/// Print `value` as JSON, or `text` otherwise.
fn emit(json_out: bool, value: &serde_json::Value, text: impl FnOnce() -> String) {
    if json_out {
        println!("{value}");
    } else {
        println!("{}", text());
    }
}

fn weight_line(manager: &WeightManager, kg: f64) -> serde_json::Value {
    let status = manager.get_status();
    json!({
        "weight_kg": kg,
        "interface": status.interface,
        "is_simulation": status.is_simulation,
    })
}

pub fn read(cart: &Cart, json_out: bool, count: u32, interval_ms: u64, no_cache: bool) {
    for i in 0..count.max(1) {
        if i > 0 {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
        let kg = cart.manager.read_weight(!no_cache);
        emit(json_out, &weight_line(&cart.manager, kg), || {
            format!("{kg:.2} kg")
        });
    }
}

pub fn cells(cart: &Cart, json_out: bool) {
    let cells = cart.manager.read_individual_cells();
    emit(json_out, &json!({ "cells_kg": cells }), || {
        let labels = ["front-left", "front-right", "rear-left", "rear-right"];
        labels
            .iter()
            .zip(cells)
            .map(|(label, kg)| format!("{label}: {kg:.2} kg"))
            .collect::<Vec<_>>()
            .join("\n")
    });
}

pub fn tare(cart: &Cart, json_out: bool) -> eyre::Result<()> {
    if !cart.manager.tare_weight() {
        return Err(CliError::TareFailed.into());
    }
    emit(json_out, &json!({ "tare": "ok" }), || "Tare complete.".into());
    Ok(())
}

pub fn calibrate(cart: &Cart, json_out: bool, known_kg: f64) -> eyre::Result<()> {
    if !cart.manager.calibrate(known_kg) {
        return Err(CliError::CalibrationFailed.into());
    }
    let kg = cart.manager.read_weight(false);
    emit(
        json_out,
        &json!({ "calibrate": "ok", "known_kg": known_kg, "weight_kg": kg }),
        || format!("Calibration complete. Now reading {kg:.2} kg."),
    );
    Ok(())
}

pub fn simulate(cart: &Cart, json_out: bool, deltas: &[f64]) -> eyre::Result<()> {
    if cart.manager.mode() != Mode::Simulation {
        return Err(CliError::NotInSimulation.into());
    }
    for &delta in deltas {
        if !cart.manager.simulate_weight_change(delta) {
            eyre::bail!("simulated weight change {delta} kg was rejected");
        }
        let kg = cart.manager.read_weight(false);
        emit(
            json_out,
            &json!({ "delta_kg": delta, "load_kg": cart.manager.simulated_load_kg(), "weight_kg": kg }),
            || format!("{delta:+.2} kg -> {kg:.2} kg"),
        );
    }
    Ok(())
}

pub fn status(cart: &Cart, json_out: bool) -> eyre::Result<()> {
    let snapshot = cart.manager.get_status();
    let link_state = cart.link.as_ref().map(|l| format!("{:?}", l.state()));
    let node = cart.node.as_ref().map(|n| n.address.clone());
    if json_out {
        let mut value = serde_json::to_value(&snapshot).wrap_err("serialise status")?;
        value["link_state"] = json!(link_state);
        value["node_address"] = json!(node);
        println!("{value}");
        return Ok(());
    }
    println!("weight:      {:.2} kg", snapshot.current_weight);
    println!("interface:   {}", snapshot.interface);
    println!("simulation:  {}", snapshot.is_simulation);
    println!("hardware:    {}", snapshot.hardware_available);
    println!("errors:      {}", snapshot.error_count);
    if let Some(e) = &snapshot.last_error {
        println!("last error:  {e}");
    }
    if let Some(state) = link_state {
        println!("link:        {state} ({})", node.unwrap_or_default());
    }
    Ok(())
}

pub fn discover(cfg: &Config, json_out: bool, force: bool) -> eyre::Result<()> {
    let discovery = Discovery::with_defaults(discovery_cfg(&cfg.wireless));
    let info = discovery.discover(force).ok_or(CliError::NodeNotFound)?;
    emit(
        json_out,
        &json!({ "address": info.address, "mode": info.mode }),
        || format!("Scale node at {} ({:?})", info.address, info.mode),
    );
    Ok(())
}

/// Poll and print every committed weight until Ctrl-C or `max_updates`.
pub fn watch(
    cart: &Cart,
    json_out: bool,
    interval_ms: u64,
    max_updates: Option<u64>,
    stop: &Arc<AtomicBool>,
) {
    let seen = Arc::new(AtomicU64::new(0));
    {
        let seen = seen.clone();
        let stop = stop.clone();
        cart.manager.register_observer("cli-watch", move |kg| {
            let n = seen.fetch_add(1, Ordering::Relaxed) + 1;
            emit(json_out, &json!({ "update": n, "weight_kg": kg }), || {
                format!("[{n}] {kg:.2} kg")
            });
            if max_updates.is_some_and(|max| n >= max) {
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    while !stop.load(Ordering::Relaxed) {
        cart.manager.read_weight(false);
        std::thread::sleep(Duration::from_millis(interval_ms));
    }
    cart.manager.unregister_observer("cli-watch");
    info!(updates = seen.load(Ordering::Relaxed), "watch stopped");
}

pub fn self_check(cart: &Cart, json_out: bool) {
    let kg = cart.manager.read_weight(false);
    let status = cart.manager.get_status();
    emit(
        json_out,
        &json!({
            "ok": true,
            "interface": status.interface,
            "hardware_available": status.hardware_available,
            "weight_kg": kg,
        }),
        || {
            if status.hardware_available {
                format!("OK: {} source responding ({kg:.2} kg)", status.interface)
            } else {
                format!("OK: no hardware detected, running on simulation ({kg:.2} kg)")
            }
        },
    );
}
