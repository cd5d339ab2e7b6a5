//! ==============================================================================
//! decoder.rs - serial line decoder
//! ==============================================================================
//!
//! purpose:
//!     turns one raw line from the mesh root into something the hub understands.
//!
//! line kinds:
//!     - telemetry json, either bare (`{"t":"k",...}`) or wrapped in a log line
//!       (`[INFO: App ] Rx '{"t":"a","s":0,"r":-28}' rssi=-26 from fd00::1`)
//!     - routing table rows in answer to the `routes` shell command
//!       (`-- fd00::203:3:3:3  to fd00::201:1:1:1 (lifetime: 1800 seconds)`)
//!     - everything else: plain console chatter
//!
//! wire contract (fixed, shared with the node firmware):
//!
//! ```text
//! t=k  keepalive   s (required), r bat tmp hum lgt (optional)
//! t=b  button      s b
//! t=a  ack         s r
//! ```
//!
//! units:
//!     tmp, hum and lgt are sent as hundredths: tmp=2450 means 24.50 C.
//!     integral and float spellings (2450, 2450.0) decode alike.
//!     bat (mV) and r (dBm) are sent unscaled.
//!     s is an unsigned 32-bit counter; anything outside 0..=4294967295
//!     is a schema error.
//!
//! decoding is pure: the same line always yields the same result.
//!
//! ==============================================================================

use crate::domain::{DeviceRoute, SensorEvent};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

const KNOWN_KINDS: [&str; 3] = ["k", "b", "a"];
const RX_MARKER: &str = "Rx '";
const FIXED_POINT_SCALE: f64 = 100.0;

/// a line that could not be turned into a sensor event
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}: {raw}")]
pub struct DecodeError {
    /// the offending line, verbatim
    pub raw: String,
    pub reason: DecodeFailure,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeFailure {
    #[error("invalid json ({0})")]
    NotJson(String),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no \"t\" discriminator")]
    MissingKind,
    #[error("unknown frame type {0}")]
    UnknownKind(String),
    #[error("schema violation ({0})")]
    Schema(String),
    #[error("line is not valid utf-8")]
    InvalidUtf8,
}

impl DecodeError {
    fn new(raw: &str, reason: DecodeFailure) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}

/// classification of one serial line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(SensorEvent),
    Route(DeviceRoute),
    Console(String),
    Malformed(DecodeError),
}

// on-the-wire shape of a telemetry frame
#[derive(Serialize, Deserialize)]
#[serde(tag = "t")]
enum WireFrame {
    #[serde(rename = "k")]
    Keepalive {
        s: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        r: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bat: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none", serialize_with = "integral")]
        tmp: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none", serialize_with = "integral")]
        hum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none", serialize_with = "integral")]
        lgt: Option<f64>,
    },
    #[serde(rename = "b")]
    Button { s: u32, b: u32 },
    #[serde(rename = "a")]
    Ack { s: u32, r: i32 },
}

fn scale_down(raw: f64) -> f64 {
    raw / FIXED_POINT_SCALE
}

fn scale_up(value: f64) -> f64 {
    (value * FIXED_POINT_SCALE).round()
}

// the firmware prints hundredths as integers; re-encode them the same way
fn integral<S: Serializer>(raw: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match raw {
        Some(raw) => serializer.serialize_some(&(raw.round() as i64)),
        None => serializer.serialize_none(),
    }
}

impl From<WireFrame> for SensorEvent {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Keepalive {
                s,
                r,
                bat,
                tmp,
                hum,
                lgt,
            } => SensorEvent::Keepalive {
                seq: s,
                rssi: r,
                battery_mv: bat,
                temp_c: tmp.map(scale_down),
                humidity_pct: hum.map(scale_down),
                light_lux: lgt.map(scale_down),
            },
            WireFrame::Button { s, b } => SensorEvent::ButtonPress {
                seq: s,
                button_id: b,
            },
            WireFrame::Ack { s, r } => SensorEvent::Ack { seq: s, rssi: r },
        }
    }
}

impl From<&SensorEvent> for WireFrame {
    fn from(event: &SensorEvent) -> Self {
        match *event {
            SensorEvent::Keepalive {
                seq,
                rssi,
                battery_mv,
                temp_c,
                humidity_pct,
                light_lux,
            } => WireFrame::Keepalive {
                s: seq,
                r: rssi,
                bat: battery_mv,
                tmp: temp_c.map(scale_up),
                hum: humidity_pct.map(scale_up),
                lgt: light_lux.map(scale_up),
            },
            SensorEvent::ButtonPress { seq, button_id } => WireFrame::Button {
                s: seq,
                b: button_id,
            },
            SensorEvent::Ack { seq, rssi } => WireFrame::Ack { s: seq, r: rssi },
        }
    }
}

/// decode one telemetry json object
pub fn decode_event(raw: &str) -> Result<SensorEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| DecodeError::new(raw, DecodeFailure::NotJson(e.to_string())))?;

    let object = value
        .as_object()
        .ok_or_else(|| DecodeError::new(raw, DecodeFailure::NotAnObject))?;

    match object.get("t") {
        None => return Err(DecodeError::new(raw, DecodeFailure::MissingKind)),
        Some(Value::String(kind)) if KNOWN_KINDS.contains(&kind.as_str()) => {}
        Some(Value::String(kind)) => {
            return Err(DecodeError::new(raw, DecodeFailure::UnknownKind(kind.clone())))
        }
        Some(other) => {
            return Err(DecodeError::new(raw, DecodeFailure::UnknownKind(other.to_string())))
        }
    }

    let frame: WireFrame = serde_json::from_value(value)
        .map_err(|e| DecodeError::new(raw, DecodeFailure::Schema(e.to_string())))?;

    Ok(frame.into())
}

/// encode an event back into the firmware's wire format
pub fn encode_event(event: &SensorEvent) -> serde_json::Result<String> {
    serde_json::to_string(&WireFrame::from(event))
}

/// classify a raw byte line from the serial port
pub fn classify_bytes(line: &[u8]) -> Option<Frame> {
    match std::str::from_utf8(line) {
        Ok(text) => classify_line(text),
        Err(_) => {
            let lossy = String::from_utf8_lossy(line);
            let trimmed = lossy.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(Frame::Malformed(DecodeError::new(
                trimmed,
                DecodeFailure::InvalidUtf8,
            )))
        }
    }
}

/// classify one text line; blank lines yield `None`
pub fn classify_line(line: &str) -> Option<Frame> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(payload) = extract_rx_payload(text) {
        return Some(match decode_event(payload) {
            Ok(event) => Frame::Event(event),
            Err(e) => Frame::Malformed(DecodeError::new(text, e.reason)),
        });
    }

    if text.starts_with('{') {
        return Some(match decode_event(text) {
            Ok(event) => Frame::Event(event),
            Err(e) => Frame::Malformed(e),
        });
    }

    if let Some(route) = parse_route_line(text) {
        return Some(Frame::Route(route));
    }

    Some(Frame::Console(text.to_string()))
}

// `... Rx '{...}' rssi=-26 from ...` -> `{...}`
fn extract_rx_payload(text: &str) -> Option<&str> {
    let start = text.find(RX_MARKER)? + RX_MARKER.len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    let payload = &rest[..end];
    (payload.starts_with('{') && payload.ends_with('}') && payload.len() > 2).then_some(payload)
}

/// parse one row of the mesh shell's `routes` output
///
/// ```text
/// -- fd00::201:1:1:1  (DODAG root)  (lifetime: infinite)
/// -- fd00::203:3:3:3  to fd00::201:1:1:1 (lifetime: 1800 seconds)
/// ```
pub fn parse_route_line(line: &str) -> Option<DeviceRoute> {
    let body = line.trim().strip_prefix("--")?.trim_start();
    let (address, rest) = body.split_once(char::is_whitespace)?;
    if !address.contains(':') {
        return None;
    }

    let lifetime_at = rest.find("(lifetime:")?;
    let (relation, lifetime_part) = rest.split_at(lifetime_at);
    let lifetime_text = lifetime_part
        .trim_end()
        .strip_prefix("(lifetime:")?
        .strip_suffix(')')?
        .trim();
    let lifetime = if lifetime_text == "infinite" {
        -1
    } else {
        lifetime_text
            .strip_suffix("seconds")
            .unwrap_or(lifetime_text)
            .trim()
            .parse()
            .ok()?
    };

    let relation = relation.trim();
    let (parent, is_root) = if relation == "(DODAG root)" {
        (String::new(), true)
    } else {
        let parent = relation.strip_prefix("to")?.trim();
        if parent.is_empty() {
            return None;
        }
        (parent.to_string(), false)
    };

    Some(DeviceRoute {
        address: address.to_string(),
        parent,
        lifetime,
        is_root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_scaling() {
        let event =
            decode_event(r#"{"t":"k","s":5,"r":-70,"bat":3300,"tmp":2450,"hum":5500,"lgt":18900}"#)
                .unwrap();
        assert_eq!(
            event,
            SensorEvent::Keepalive {
                seq: 5,
                rssi: Some(-70),
                battery_mv: Some(3300),
                temp_c: Some(24.50),
                humidity_pct: Some(55.00),
                light_lux: Some(189.00),
            }
        );
    }

    #[test]
    fn test_keepalive_missing_optionals_are_unknown() {
        let event = decode_event(r#"{"t":"k","s":7}"#).unwrap();
        assert_eq!(
            event,
            SensorEvent::Keepalive {
                seq: 7,
                rssi: None,
                battery_mv: None,
                temp_c: None,
                humidity_pct: None,
                light_lux: None,
            }
        );
    }

    #[test]
    fn test_negative_temperature() {
        let event = decode_event(r#"{"t":"k","s":1,"tmp":-525}"#).unwrap();
        match event {
            SensorEvent::Keepalive { temp_c, .. } => assert_eq!(temp_c, Some(-5.25)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_float_encoded_hundredths() {
        let event = decode_event(r#"{"t":"k","s":2,"tmp":2450.0,"hum":5512.5}"#).unwrap();
        match event {
            SensorEvent::Keepalive {
                temp_c,
                humidity_pct,
                ..
            } => {
                assert_eq!(temp_c, Some(24.5));
                assert_eq!(humidity_pct, Some(55.125));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_seq_outside_u32_is_schema_error() {
        let err = decode_event(r#"{"t":"a","s":4294967296,"r":-30}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::Schema(_)));

        let err = decode_event(r#"{"t":"a","s":-1,"r":-30}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::Schema(_)));
    }

    #[test]
    fn test_reencode_keeps_hundredths_integral() {
        let event = SensorEvent::Keepalive {
            seq: 3,
            rssi: None,
            battery_mv: None,
            temp_c: Some(24.5),
            humidity_pct: None,
            light_lux: None,
        };
        assert_eq!(encode_event(&event).unwrap(), r#"{"t":"k","s":3,"tmp":2450}"#);
    }

    #[test]
    fn test_button_and_ack() {
        assert_eq!(
            decode_event(r#"{"t":"b","s":3,"b":0}"#).unwrap(),
            SensorEvent::ButtonPress { seq: 3, button_id: 0 }
        );
        assert_eq!(
            decode_event(r#"{"t":"a","s":1,"r":-30}"#).unwrap(),
            SensorEvent::Ack { seq: 1, rssi: -30 }
        );
    }

    #[test]
    fn test_malformed_json_keeps_raw_text() {
        let raw = r#"{"t":"k","s":}"#;
        let err = decode_event(raw).unwrap_err();
        assert_eq!(err.raw, raw);
        assert!(matches!(err.reason, DecodeFailure::NotJson(_)));
    }

    #[test]
    fn test_unknown_and_missing_kind() {
        let err = decode_event(r#"{"t":"x","data":"test"}"#).unwrap_err();
        assert_eq!(err.reason, DecodeFailure::UnknownKind("x".to_string()));

        let err = decode_event(r#"{"s":1,"r":-28}"#).unwrap_err();
        assert_eq!(err.reason, DecodeFailure::MissingKind);

        let err = decode_event("[1,2]").unwrap_err();
        assert_eq!(err.reason, DecodeFailure::NotAnObject);
    }

    #[test]
    fn test_missing_required_field() {
        let err = decode_event(r#"{"t":"a","s":4}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::Schema(_)));

        let err = decode_event(r#"{"t":"b","b":1}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::Schema(_)));
    }

    #[test]
    fn test_reencode_round_trip() {
        let events = [
            SensorEvent::Keepalive {
                seq: 12,
                rssi: Some(-81),
                battery_mv: Some(2980),
                temp_c: Some(19.37),
                humidity_pct: None,
                light_lux: Some(0.5),
            },
            SensorEvent::ButtonPress { seq: 13, button_id: 2 },
            SensorEvent::Ack { seq: 14, rssi: -28 },
        ];
        for event in events {
            let wire = encode_event(&event).unwrap();
            assert_eq!(decode_event(&wire).unwrap(), event, "wire: {}", wire);
        }
    }

    #[test]
    fn test_log_wrapped_frame() {
        let line = "[INFO: App       ] Rx '{\"t\":\"a\",\"s\":0,\"r\":-28}' rssi=-26 from fd00::212:4b00:1cab:6bc0\n";
        assert_eq!(
            classify_line(line),
            Some(Frame::Event(SensorEvent::Ack { seq: 0, rssi: -28 }))
        );
    }

    #[test]
    fn test_log_wrapped_invalid_payload_is_malformed() {
        let line = "[INFO: App       ] Rx '{invalid}' rssi=-26";
        match classify_line(line) {
            Some(Frame::Malformed(err)) => assert_eq!(err.raw, line),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_console_and_blank_lines() {
        assert_eq!(classify_line("   \n"), None);
        assert_eq!(
            classify_line("[INFO: App       ] Stats: Tx=0 Rx=0"),
            Some(Frame::Console("[INFO: App       ] Stats: Tx=0 Rx=0".to_string()))
        );
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        match classify_bytes(b"\xff\xfe invalid bytes") {
            Some(Frame::Malformed(err)) => assert_eq!(err.reason, DecodeFailure::InvalidUtf8),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_route_lines() {
        assert_eq!(
            parse_route_line("-- fd00::201:1:1:1  (DODAG root)  (lifetime: infinite)"),
            Some(DeviceRoute {
                address: "fd00::201:1:1:1".to_string(),
                parent: String::new(),
                lifetime: -1,
                is_root: true,
            })
        );
        assert_eq!(
            classify_line("-- fd00::203:3:3:3  to fd00::201:1:1:1 (lifetime: 1800 seconds)"),
            Some(Frame::Route(DeviceRoute {
                address: "fd00::203:3:3:3".to_string(),
                parent: "fd00::201:1:1:1".to_string(),
                lifetime: 1800,
                is_root: false,
            }))
        );
    }

    #[test]
    fn test_non_route_dash_lines() {
        assert_eq!(parse_route_line("-- fe80::1 (lifetime: infinite)"), None);
        assert_eq!(parse_route_line("-- hello world"), None);
        assert_eq!(parse_route_line("Routing links (2 in total):"), None);
    }
}
