//! ==============================================================================
//! relay.rs - viewer commands towards the mesh
//! ==============================================================================
//!
//! purpose:
//!     executes commands typed into a dashboard and owns the one path that
//!     writes to the serial port.
//!
//! flow:
//!
//! ```text
//! viewer ──► CommandRelay ──► outbound queue ──► writer task ──► serial port
//!                 │                                   │
//!                 └── begin_refresh ──► hub           └── failure ──► hub.reply(origin)
//! ```
//!
//! ordering:
//!     `send` text and the `routes` request share the outbound queue, so lines
//!     reach the wire whole and in order. failures are reported to the viewer
//!     that asked; nobody else hears about them.
//!
//! ==============================================================================

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{BridgeError, Result};
use crate::hub::{HubHandle, ViewerId};
use crate::link::WriterSlot;
use crate::messages::{ViewerCommand, ViewerMessage};

pub const OUTBOUND_CAPACITY: usize = 64;

/// shell command that makes the root print its routing table
pub const ROUTES_COMMAND: &str = "routes";

/// a line waiting to be written to the serial port
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundLine {
    pub text: String,
    /// viewer to notify if the write fails
    pub origin: ViewerId,
}

pub fn outbound_channel() -> (mpsc::Sender<OutboundLine>, mpsc::Receiver<OutboundLine>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

#[derive(Clone)]
pub struct CommandRelay {
    hub: HubHandle,
    outbound: mpsc::Sender<OutboundLine>,
}

impl CommandRelay {
    pub fn new(hub: HubHandle, outbound: mpsc::Sender<OutboundLine>) -> Self {
        Self { hub, outbound }
    }

    /// handle one raw text message received from a viewer
    pub async fn handle(&self, viewer: ViewerId, raw: &str) {
        match ViewerCommand::parse(raw) {
            ViewerCommand::Send { text } => self.send_text(viewer, text).await,
            ViewerCommand::Routes => self.request_routes(viewer).await,
            ViewerCommand::Ping => self.reply(viewer, ViewerMessage::Pong).await,
            ViewerCommand::Invalid(reason) => {
                tracing::debug!("Viewer {} sent invalid command: {}", viewer, reason);
                self.reject(viewer, BridgeError::InvalidCommand(reason)).await;
            }
        }
    }

    /// answer a viewer with an error without touching anyone else
    pub async fn reject(&self, viewer: ViewerId, err: BridgeError) {
        self.reply(viewer, ViewerMessage::error(err.to_string())).await;
    }

    async fn send_text(&self, viewer: ViewerId, text: String) {
        if text.trim().is_empty() {
            self.reject(
                viewer,
                BridgeError::InvalidCommand("send requires non-empty text".to_string()),
            )
            .await;
            return;
        }
        if let Err(e) = self.enqueue(text, viewer) {
            self.reject(viewer, e).await;
        }
    }

    async fn request_routes(&self, viewer: ViewerId) {
        if let Err(e) = self.enqueue(ROUTES_COMMAND.to_string(), viewer) {
            self.reject(viewer, e).await;
            return;
        }
        if let Err(e) = self.hub.begin_refresh().await {
            tracing::warn!("Could not start route refresh: {}", e);
        }
    }

    fn enqueue(&self, text: String, origin: ViewerId) -> Result<()> {
        let line = OutboundLine {
            text,
            origin,
        };
        self.outbound.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => BridgeError::OutboundFull,
            TrySendError::Closed(_) => BridgeError::LinkDown,
        })
    }

    async fn reply(&self, viewer: ViewerId, message: ViewerMessage) {
        if let Err(e) = self.hub.reply(viewer, message).await {
            tracing::debug!("Reply to viewer {} dropped: {}", viewer, e);
        }
    }
}

/// drain the outbound queue onto whatever serial writer is installed
pub async fn run_outbound_writer(
    mut queue: mpsc::Receiver<OutboundLine>,
    writer: WriterSlot,
    hub: HubHandle,
) {
    while let Some(line) = queue.recv().await {
        let slot = writer.clone();
        let text = line.text.clone();
        let result = tokio::task::spawn_blocking(move || slot.write_line(&text))
            .await
            .unwrap_or_else(|e| Err(BridgeError::Io(std::io::Error::other(e.to_string()))));

        match result {
            Ok(()) => tracing::info!("[SEND] {}", line.text),
            Err(e) => {
                tracing::warn!("Serial write of {:?} failed: {}", line.text, e);
                let message = ViewerMessage::error(format!("send failed: {}", e));
                if hub.reply(line.origin, message).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("Outbound writer stopped");
}
