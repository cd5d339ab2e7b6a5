//! ==============================================================================
//! hub.rs - broadcast hub
//! ==============================================================================
//!
//! purpose:
//!     single owner of the live state (latest reading, packet stats, rssi
//!     history, device registry) and of the set of connected viewers.
//!
//! architecture:
//!
//! ```text
//! ┌──────────────┐   Frame    ┌──────────────────────────┐  Arc<str>  ┌──────────┐
//! │ serial reader│ ─────────► │           hub            │ ─────────► │ viewer 1 │
//! └──────────────┘            │  (one task, one inbox)   │ ─────────► │ viewer 2 │
//! ┌──────────────┐  commands  │                          │ ─────────► │   ...    │
//! │ command relay│ ─────────► │ stats/history/registry   │            └──────────┘
//! └──────────────┘            └──────────────────────────┘
//! ```
//!
//! state:
//!     nothing outside this task touches the state; everything arrives as a
//!     `HubCommand` and is applied in inbox order. fan-out serializes a
//!     message once and `try_send`s it into each viewer's bounded queue, so
//!     the hub never waits on a socket.
//!
//! backpressure:
//!     a viewer whose queue is full is evicted on the spot. dropping its slot
//!     fires the viewer's `released` signal, which makes the viewer task
//!     discard whatever is still queued and close the socket.
//!
//! ordering:
//!     `init` is pushed into a new viewer's queue before the viewer is added
//!     to the fan-out set, and both happen inside one inbox step, so no event
//!     can overtake it.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::decoder::Frame;
use crate::domain::{DeviceRoute, LatestReading, SignalSample, Stats};
use crate::error::{BridgeError, Result};
use crate::history::{SignalHistory, DEFAULT_HISTORY_CAPACITY};
use crate::messages::ViewerMessage;
use crate::registry::{DeviceRegistry, RefreshCycle, RefreshOutcome};
use crate::stats::PacketStats;

pub type ViewerId = u64;

const INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// outbound messages buffered per viewer before it is dropped
    pub viewer_queue_capacity: usize,
    pub history_capacity: usize,
    /// silence that closes a route refresh
    pub quiet_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 256,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            quiet_period: Duration::from_millis(1500),
        }
    }
}

/// state summary for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub connected_viewers: usize,
    pub link_connected: bool,
    pub latest: LatestReading,
    pub stats: Stats,
    pub devices: Vec<DeviceRoute>,
}

enum HubCommand {
    Frame(Frame),
    Connect {
        id: ViewerId,
        queue: mpsc::Sender<Arc<str>>,
        released: oneshot::Sender<()>,
    },
    Disconnect(ViewerId),
    Direct {
        id: ViewerId,
        message: ViewerMessage,
    },
    Broadcast(ViewerMessage),
    BeginRefresh,
    LinkStatus {
        connected: bool,
        detail: String,
    },
    Status(oneshot::Sender<HubStatus>),
    Shutdown,
}

/// receiving side of one viewer's queue
pub struct ViewerSubscription {
    pub id: ViewerId,
    /// serialized messages, `init` first
    pub messages: mpsc::Receiver<Arc<str>>,
    /// resolves once the hub lets go of this viewer (eviction or shutdown)
    pub released: oneshot::Receiver<()>,
}

/// cloneable front door to the hub task
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl HubHandle {
    /// register a new viewer; its queue already holds `init` when this returns
    pub async fn connect(&self) -> Result<ViewerSubscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, messages) = mpsc::channel(self.queue_capacity);
        let (release_tx, released) = oneshot::channel();
        self.send(HubCommand::Connect {
            id,
            queue,
            released: release_tx,
        })
        .await?;
        Ok(ViewerSubscription {
            id,
            messages,
            released,
        })
    }

    pub async fn disconnect(&self, id: ViewerId) {
        // hub already gone means the viewer is gone too
        let _ = self.send(HubCommand::Disconnect(id)).await;
    }

    pub async fn publish(&self, frame: Frame) -> Result<()> {
        self.send(HubCommand::Frame(frame)).await
    }

    /// publish from a plain (non-async) thread such as the serial reader
    pub fn blocking_publish(&self, frame: Frame) -> Result<()> {
        self.tx
            .blocking_send(HubCommand::Frame(frame))
            .map_err(|_| BridgeError::HubClosed)
    }

    /// send a message to one viewer only
    pub async fn reply(&self, id: ViewerId, message: ViewerMessage) -> Result<()> {
        self.send(HubCommand::Direct { id, message }).await
    }

    pub async fn broadcast(&self, message: ViewerMessage) -> Result<()> {
        self.send(HubCommand::Broadcast(message)).await
    }

    /// open (or extend) a route refresh cycle
    pub async fn begin_refresh(&self) -> Result<()> {
        self.send(HubCommand::BeginRefresh).await
    }

    pub async fn link_status(&self, connected: bool, detail: impl Into<String>) -> Result<()> {
        self.send(HubCommand::LinkStatus {
            connected,
            detail: detail.into(),
        })
        .await
    }

    pub async fn status(&self) -> Result<HubStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Status(tx)).await?;
        rx.await.map_err(|_| BridgeError::HubClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.send(HubCommand::Shutdown).await;
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| BridgeError::HubClosed)
    }
}

struct ViewerSlot {
    queue: mpsc::Sender<Arc<str>>,
    // dropped together with the slot; the viewer task watches the other end
    _release: oneshot::Sender<()>,
}

pub struct Hub {
    inbox: mpsc::Receiver<HubCommand>,
    config: HubConfig,
    latest: LatestReading,
    stats: PacketStats,
    history: SignalHistory,
    registry: DeviceRegistry,
    refresh: Option<RefreshCycle>,
    viewers: BTreeMap<ViewerId, ViewerSlot>,
    link_connected: bool,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let handle = HubHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: config.viewer_queue_capacity.max(1),
        };
        let hub = Self {
            inbox,
            history: SignalHistory::new(config.history_capacity),
            config,
            latest: LatestReading::default(),
            stats: PacketStats::new(),
            registry: DeviceRegistry::new(),
            refresh: None,
            viewers: BTreeMap::new(),
            link_connected: false,
        };
        (hub, handle)
    }

    /// start the hub on the current runtime
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        tracing::info!("Broadcast hub started");
        loop {
            let deadline = self.refresh.as_ref().map(RefreshCycle::deadline);
            let command = tokio::select! {
                command = self.inbox.recv() => command,
                _ = wait_until(deadline) => {
                    self.close_refresh();
                    continue;
                }
            };

            match command {
                None | Some(HubCommand::Shutdown) => break,
                Some(command) => self.handle(command),
            }
        }

        let remaining = self.viewers.len();
        self.viewers.clear();
        tracing::info!("Broadcast hub stopped, released {} viewers", remaining);
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Frame(frame) => self.on_frame(frame),
            HubCommand::Connect {
                id,
                queue,
                released,
            } => self.on_connect(id, queue, released),
            HubCommand::Disconnect(id) => self.on_disconnect(id),
            HubCommand::Direct { id, message } => self.send_to(id, &message),
            HubCommand::Broadcast(message) => self.fan_out(&message),
            HubCommand::BeginRefresh => self.begin_refresh(),
            HubCommand::LinkStatus { connected, detail } => {
                self.link_connected = connected;
                self.fan_out(&ViewerMessage::log(detail));
            }
            HubCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            HubCommand::Shutdown => {}
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Event(event) => {
                let stats = self.stats.record(&event);
                if let Some(rssi) = event.rssi() {
                    self.history.push(SignalSample {
                        seq: event.seq(),
                        rssi,
                    });
                }
                self.latest.merge(&event);
                self.fan_out(&ViewerMessage::from_event(&event, stats));
            }
            Frame::Route(route) => {
                let quiet_period = self.config.quiet_period;
                let cycle = self.refresh.get_or_insert_with(|| {
                    tracing::info!("Unsolicited route line, opening refresh cycle");
                    RefreshCycle::open(quiet_period)
                });
                let devices = cycle.accept(route.clone());
                self.fan_out(&ViewerMessage::Route { route, devices });
            }
            Frame::Console(text) => {
                self.fan_out(&ViewerMessage::log(text));
            }
            Frame::Malformed(err) => {
                tracing::warn!("Malformed frame: {}", err);
                self.fan_out(&ViewerMessage::error(format!("malformed frame: {}", err)));
            }
        }
    }

    fn on_connect(
        &mut self,
        id: ViewerId,
        queue: mpsc::Sender<Arc<str>>,
        released: oneshot::Sender<()>,
    ) {
        let init = ViewerMessage::Init {
            latest: self.latest.clone(),
            stats: self.stats.snapshot(),
            rssi_history: self.history.snapshot(),
            devices: self.registry.snapshot().to_vec(),
        };
        let Some(payload) = serialize(&init) else {
            return;
        };
        if queue.try_send(payload).is_err() {
            tracing::warn!("Viewer {} went away before init", id);
            return;
        }
        self.viewers.insert(
            id,
            ViewerSlot {
                queue,
                _release: released,
            },
        );
        tracing::info!("Viewer {} connected. Total viewers: {}", id, self.viewers.len());
    }

    fn on_disconnect(&mut self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            tracing::info!("Viewer {} disconnected. Remaining: {}", id, self.viewers.len());
        }
    }

    fn begin_refresh(&mut self) {
        match self.refresh.as_mut() {
            Some(cycle) => cycle.extend(),
            None => {
                tracing::info!("Route refresh started");
                self.refresh = Some(RefreshCycle::open(self.config.quiet_period));
            }
        }
    }

    fn close_refresh(&mut self) {
        let Some(cycle) = self.refresh.take() else {
            return;
        };
        match self.registry.commit(cycle) {
            RefreshOutcome::Replaced(devices) => {
                tracing::info!(
                    "Route refresh complete: {} devices (generation {})",
                    devices.len(),
                    self.registry.generation()
                );
                self.fan_out(&ViewerMessage::Devices {
                    devices: devices.to_vec(),
                });
                self.fan_out(&ViewerMessage::log(format!(
                    "route refresh complete: {} devices",
                    devices.len()
                )));
            }
            RefreshOutcome::NoResponse => {
                tracing::warn!("Route refresh timed out with no responses");
                self.fan_out(&ViewerMessage::log(
                    "route refresh timed out with no responses",
                ));
            }
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            connected_viewers: self.viewers.len(),
            link_connected: self.link_connected,
            latest: self.latest.clone(),
            stats: self.stats.snapshot(),
            devices: self.registry.snapshot().to_vec(),
        }
    }

    /// enqueue a message for every viewer, evicting those that cannot keep up
    fn fan_out(&mut self, message: &ViewerMessage) {
        if self.viewers.is_empty() {
            return;
        }
        let Some(payload) = serialize(message) else {
            return;
        };

        let mut dead = Vec::new();
        for (id, slot) in &self.viewers {
            if let Err(e) = slot.queue.try_send(Arc::clone(&payload)) {
                dead.push((*id, e));
            }
        }
        for (id, reason) in dead {
            self.evict(id, reason);
        }
    }

    fn send_to(&mut self, id: ViewerId, message: &ViewerMessage) {
        let Some(slot) = self.viewers.get(&id) else {
            return;
        };
        let Some(payload) = serialize(message) else {
            return;
        };
        if let Err(e) = slot.queue.try_send(payload) {
            self.evict(id, e);
        }
    }

    fn evict(&mut self, id: ViewerId, reason: TrySendError<Arc<str>>) {
        self.viewers.remove(&id);
        match reason {
            TrySendError::Full(_) => tracing::warn!(
                "Viewer {} queue full, dropping it. Remaining: {}",
                id,
                self.viewers.len()
            ),
            TrySendError::Closed(_) => tracing::info!(
                "Viewer {} queue closed. Remaining: {}",
                id,
                self.viewers.len()
            ),
        }
    }
}

fn serialize(message: &ViewerMessage) -> Option<Arc<str>> {
    match message.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!("Failed to serialize {} message: {}", message.kind(), e);
            None
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
