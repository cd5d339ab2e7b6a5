//! Serial-to-WebSocket bridge for an RPL sensor mesh.
//!
//! A single serial link from the mesh root carries newline-delimited JSON
//! telemetry. This crate decodes it, keeps packet reception statistics, a
//! bounded rssi history and the routing table, and fans everything out to any
//! number of live dashboard viewers. Viewers can send text commands back into
//! the mesh and request a topology refresh.
//!
//! # Pipeline
//!
//! ```text
//! serial ──► link (decoder) ──► hub ──► viewer queues ──► websockets
//!   ▲                            ▲
//!   └──── relay (writer) ◄───────┴──── viewer commands
//! ```

pub mod config;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod history;
pub mod hub;
pub mod link;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;

pub use decoder::{classify_line, decode_event, encode_event, DecodeError, Frame};
pub use domain::{DeviceRoute, LatestReading, SensorEvent, SignalSample, Stats};
pub use error::{BridgeError, Result};
pub use hub::{Hub, HubConfig, HubHandle, ViewerId, ViewerSubscription};
pub use link::{FrameSource, LinkHandles, LinkSupervisor, SerialSource, WriterSlot};
pub use messages::{ViewerCommand, ViewerMessage};
pub use relay::CommandRelay;
