//! JSON messages exchanged with the wireless scale node.
//!
//! Inbound frames are decoded once, here, into [`InboundMessage`]; nothing
//! downstream looks at raw JSON.
use std::time::SystemTime;

use feedcart_traits::{CELL_COUNT, WeightSample};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};

/// Status payload served by `GET /status` and by the `get_status` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub device_name: String,
    #[serde(default)]
    pub weight_available: bool,
    #[serde(default)]
    pub current_weight: f64,
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default)]
    pub battery_voltage: f64,
    #[serde(default)]
    pub uptime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub command: Option<String>,
    pub status: CommandStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Periodic `weight_data` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightPush {
    pub total_kg: f64,
    #[serde(default)]
    pub corners: Option<Vec<f64>>,
    #[serde(default)]
    pub battery_v: f64,
    #[serde(default)]
    pub wifi_rssi: i32,
}

impl WeightPush {
    /// Stamp the push with the receive time. Corners are kept only when all four are present.
    pub fn into_sample(self, timestamp: SystemTime) -> WeightSample {
        let corner_kg = self
            .corners
            .and_then(|c| <[f64; CELL_COUNT]>::try_from(c.as_slice()).ok());
        WeightSample {
            total_kg: self.total_kg,
            corner_kg,
            battery_voltage: self.battery_v,
            wifi_rssi: self.wifi_rssi,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Status(StatusResponse),
    Response(CommandResponse),
    WeightData(WeightPush),
    /// Any other `type`; carried so it can be logged.
    Unknown(String),
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<InboundMessage> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let msg = match kind.as_str() {
        "weight_data" => InboundMessage::WeightData(serde_json::from_value(value)?),
        "response" => InboundMessage::Response(serde_json::from_value(value)?),
        "status" => InboundMessage::Status(serde_json::from_value(value)?),
        _ => InboundMessage::Unknown(kind),
    };
    Ok(msg)
}

/// Outbound command, serialised as `{"command": "<name>", ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Tare,
    Calibrate { weight: f64 },
    GetStatus,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Tare => "tare",
            Command::Calibrate { .. } => "calibrate",
            Command::GetStatus => "get_status",
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(LinkError::from)
    }

    /// Whether `msg` is the node's answer to this command.
    pub fn is_answered_by(&self, msg: &InboundMessage) -> bool {
        match msg {
            InboundMessage::Response(r) => r
                .command
                .as_deref()
                .is_none_or(|name| name == self.name()),
            InboundMessage::Status(_) => matches!(self, Command::GetStatus),
            _ => false,
        }
    }
}
