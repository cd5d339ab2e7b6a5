//! ==============================================================================
//! messages.rs - viewer protocol
//! ==============================================================================
//!
//! purpose:
//!     json shapes exchanged with dashboard viewers over their websocket.
//!
//! shapes:
//!     server -> viewer: `{"type": "<kind>", ...payload}`
//!     viewer -> server: `{"cmd": "send", "text": "..."}`, `{"cmd": "routes"}`,
//!                       `{"cmd": "ping"}`
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::{DeviceRoute, LatestReading, SensorEvent, SignalSample, Stats};

/// every message a viewer can receive
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// full snapshot, always the first message on a connection
    Init {
        latest: LatestReading,
        stats: Stats,
        rssi_history: Vec<SignalSample>,
        devices: Vec<DeviceRoute>,
    },

    Keepalive {
        seq: u32,
        rssi: Option<i32>,
        battery_mv: Option<u32>,
        temp_c: Option<f64>,
        humidity_pct: Option<f64>,
        light_lux: Option<f64>,
        stats: Stats,
    },

    Button {
        seq: u32,
        button_id: u32,
        stats: Stats,
    },

    Ack {
        seq: u32,
        rssi: i32,
        stats: Stats,
    },

    /// one routing row as it arrives, with the rows collected so far
    Route {
        route: DeviceRoute,
        devices: Vec<DeviceRoute>,
    },

    /// the registry after a completed refresh
    Devices {
        devices: Vec<DeviceRoute>,
    },

    Log {
        message: String,
    },

    Error {
        message: String,
    },

    Pong,
}

impl ViewerMessage {
    /// message for a freshly accounted sensor event
    pub fn from_event(event: &SensorEvent, stats: Stats) -> Self {
        match *event {
            SensorEvent::Keepalive {
                seq,
                rssi,
                battery_mv,
                temp_c,
                humidity_pct,
                light_lux,
            } => ViewerMessage::Keepalive {
                seq,
                rssi,
                battery_mv,
                temp_c,
                humidity_pct,
                light_lux,
                stats,
            },
            SensorEvent::ButtonPress { seq, button_id } => ViewerMessage::Button {
                seq,
                button_id,
                stats,
            },
            SensorEvent::Ack { seq, rssi } => ViewerMessage::Ack { seq, rssi, stats },
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        ViewerMessage::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ViewerMessage::Error {
            message: message.into(),
        }
    }

    /// wire name of this message, as used in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            ViewerMessage::Init { .. } => "init",
            ViewerMessage::Keepalive { .. } => "keepalive",
            ViewerMessage::Button { .. } => "button",
            ViewerMessage::Ack { .. } => "ack",
            ViewerMessage::Route { .. } => "route",
            ViewerMessage::Devices { .. } => "devices",
            ViewerMessage::Log { .. } => "log",
            ViewerMessage::Error { .. } => "error",
            ViewerMessage::Pong => "pong",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum WireCommand {
    Send { text: String },
    Routes,
    Ping,
}

/// a command received from a viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    /// forward raw text to the mesh root
    Send { text: String },
    /// refresh the routing table
    Routes,
    Ping,
    /// anything else, with the reason it was rejected
    Invalid(String),
}

impl ViewerCommand {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<WireCommand>(raw) {
            Ok(WireCommand::Send { text }) => ViewerCommand::Send { text },
            Ok(WireCommand::Routes) => ViewerCommand::Routes,
            Ok(WireCommand::Ping) => ViewerCommand::Ping,
            Err(e) => ViewerCommand::Invalid(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keepalive_message_shape() {
        let event = SensorEvent::Keepalive {
            seq: 5,
            rssi: Some(-70),
            battery_mv: Some(3300),
            temp_c: Some(24.5),
            humidity_pct: None,
            light_lux: None,
        };
        let message = ViewerMessage::from_event(&event, Stats::default());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "keepalive");
        assert_eq!(value["temp_c"], 24.5);
        assert_eq!(value["humidity_pct"], serde_json::Value::Null);
        assert_eq!(value["stats"]["prr"], 100.0);
    }

    #[test]
    fn test_route_message_shape() {
        let route = DeviceRoute {
            address: "fd00::2".to_string(),
            parent: "fd00::1".to_string(),
            lifetime: -1,
            is_root: false,
        };
        let message = ViewerMessage::Route {
            route: route.clone(),
            devices: vec![route],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "route");
        assert_eq!(value["route"]["lifetime"], -1);
        assert_eq!(value["devices"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_log_and_pong_shapes() {
        assert_eq!(
            serde_json::to_value(ViewerMessage::log("link up")).unwrap(),
            json!({"type": "log", "message": "link up"})
        );
        assert_eq!(
            serde_json::to_value(ViewerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ViewerCommand::parse(r#"{"cmd":"send","text":"led on"}"#),
            ViewerCommand::Send {
                text: "led on".to_string()
            }
        );
        assert_eq!(ViewerCommand::parse(r#"{"cmd":"routes"}"#), ViewerCommand::Routes);
        assert_eq!(ViewerCommand::parse(r#"{"cmd":"ping"}"#), ViewerCommand::Ping);
    }

    #[test]
    fn test_parse_invalid_commands() {
        assert!(matches!(
            ViewerCommand::parse(r#"{"cmd":"reboot"}"#),
            ViewerCommand::Invalid(_)
        ));
        assert!(matches!(
            ViewerCommand::parse(r#"{"cmd":"send"}"#),
            ViewerCommand::Invalid(_)
        ));
        assert!(matches!(ViewerCommand::parse("routes"), ViewerCommand::Invalid(_)));
    }
}
