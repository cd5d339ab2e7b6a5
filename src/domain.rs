//! ==============================================================================
//! domain.rs - shared data model
//! ==============================================================================
//!
//! purpose:
//!     the typed values that flow from the serial link to the viewers.
//!     everything here is plain data: the hub owns the mutable instances,
//!     everyone else sees clones or snapshots.
//!
//! relationships:
//!     - produced by: decoder.rs (SensorEvent, DeviceRoute)
//!     - aggregated by: stats.rs (Stats), history.rs (SignalSample)
//!     - owned by: hub.rs (LatestReading, registry, history, stats)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

/// one decoded telemetry frame from the mesh
///
/// optional keepalive fields stay `None` when the node did not report them;
/// "unknown" is never collapsed to zero.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Keepalive {
        seq: u32,
        rssi: Option<i32>,
        battery_mv: Option<u32>,
        temp_c: Option<f64>,
        humidity_pct: Option<f64>,
        light_lux: Option<f64>,
    },
    ButtonPress {
        seq: u32,
        button_id: u32,
    },
    Ack {
        seq: u32,
        rssi: i32,
    },
}

impl SensorEvent {
    /// sequence number carried by every variant
    pub fn seq(&self) -> u32 {
        match self {
            SensorEvent::Keepalive { seq, .. }
            | SensorEvent::ButtonPress { seq, .. }
            | SensorEvent::Ack { seq, .. } => *seq,
        }
    }

    /// signal strength, if this frame reports one
    pub fn rssi(&self) -> Option<i32> {
        match self {
            SensorEvent::Keepalive { rssi, .. } => *rssi,
            SensorEvent::Ack { rssi, .. } => Some(*rssi),
            SensorEvent::ButtonPress { .. } => None,
        }
    }

    pub fn is_button(&self) -> bool {
        matches!(self, SensorEvent::ButtonPress { .. })
    }
}

/// packet reception statistics as seen by viewers
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub received: u64,
    pub expected: u64,
    /// packet reception ratio in percent, clamped to [0, 100]
    pub prr: f64,
    pub button_count: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            received: 0,
            expected: 0,
            prr: 100.0,
            button_count: 0,
        }
    }
}

/// one entry of the rssi history chart
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSample {
    pub seq: u32,
    pub rssi: i32,
}

/// one node of the rpl routing tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRoute {
    pub address: String,
    /// next hop towards the root; empty for the root itself
    pub parent: String,
    /// remaining route lifetime in seconds, -1 = infinite
    pub lifetime: i64,
    pub is_root: bool,
}

/// most recent keepalive values, merged field by field
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_mv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_lux: Option<f64>,
}

impl LatestReading {
    /// overwrite only the fields the keepalive actually carried
    pub fn merge(&mut self, event: &SensorEvent) {
        if let SensorEvent::Keepalive {
            seq,
            rssi,
            battery_mv,
            temp_c,
            humidity_pct,
            light_lux,
        } = event
        {
            self.seq = Some(*seq);
            self.rssi = rssi.or(self.rssi);
            self.battery_mv = battery_mv.or(self.battery_mv);
            self.temp_c = temp_c.or(self.temp_c);
            self.humidity_pct = humidity_pct.or(self.humidity_pct);
            self.light_lux = light_lux.or(self.light_lux);
        }
    }
}
