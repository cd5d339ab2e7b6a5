use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Serial link closed by peer")]
    LinkClosed,

    #[error("Serial link is not connected")]
    LinkDown,

    #[error("Outbound queue is full")]
    OutboundFull,

    #[error("Hub has shut down")]
    HubClosed,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
