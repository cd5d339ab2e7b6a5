//! ==============================================================================
//! link.rs - serial link and ingestion pipeline
//! ==============================================================================
//!
//! purpose:
//!     keeps a line-oriented link to the mesh root open, decodes every line it
//!     prints and hands the result to the hub.
//!
//! design:
//!     - `FrameSource` is the seam to the transport. `SerialSource` opens a real
//!       UART; tests plug in scripted sources.
//!     - reading is blocking, so each connection gets one dedicated blocking
//!       thread (`spawn_blocking`). that thread is the only producer of frames.
//!     - the write half lives in a shared `WriterSlot`; relay.rs is its only
//!       user. the slot is emptied while the link is down.
//!     - when the link drops, viewers get a log line and the supervisor retries
//!       with capped exponential backoff.
//!
//! relationships:
//!     - uses: decoder.rs (line classification)
//!     - feeds: hub.rs (frames, link status)
//!     - shares: WriterSlot with relay.rs
//!
//! ==============================================================================

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio::sync::watch;

use crate::decoder::classify_bytes;
use crate::error::{BridgeError, Result};
use crate::hub::HubHandle;

/// both halves of an open link
pub struct LinkHandles {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// something that can produce a fresh line-oriented link to the mesh root
pub trait FrameSource: Send + Sync + 'static {
    /// human readable name for logs
    fn describe(&self) -> String;

    /// open the link; called again after every loss
    fn open(&self) -> Result<LinkHandles>;
}

/// the mesh root's UART (usually a USB CDC device)
pub struct SerialSource {
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialSource {
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    /// * `read_timeout` - how long a read may block; bounds shutdown latency
    pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl FrameSource for SerialSource {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }

    fn open(&self) -> Result<LinkHandles> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;
        let writer = port.try_clone()?;

        tracing::info!("Opened serial port: {}", self.describe());
        Ok(LinkHandles {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

/// the currently installed write half, if the link is up
#[derive(Clone, Default)]
pub struct WriterSlot(Arc<Mutex<Option<Box<dyn Write + Send>>>>);

impl WriterSlot {
    pub fn install(&self, writer: Box<dyn Write + Send>) {
        *self.lock() = Some(writer);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// write one newline-terminated line; blocks on the port
    pub fn write_line(&self, text: &str) -> Result<()> {
        let mut guard = self.lock();
        let writer = guard.as_mut().ok_or(BridgeError::LinkDown)?;
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Write + Send>>> {
        // a panic mid-write leaves nothing inconsistent behind
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug)]
enum ReadEnd {
    Shutdown,
    Lost(BridgeError),
}

/// owns the link lifecycle: open, read until lost, back off, repeat
pub struct LinkSupervisor<S: FrameSource> {
    source: Arc<S>,
    hub: HubHandle,
    writer: WriterSlot,
    backoff: Backoff,
    show_serial_data: bool,
    shutdown: watch::Receiver<bool>,
}

impl<S: FrameSource> LinkSupervisor<S> {
    pub fn new(
        source: S,
        hub: HubHandle,
        writer: WriterSlot,
        backoff: Backoff,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source: Arc::new(source),
            hub,
            writer,
            backoff,
            show_serial_data: true,
            shutdown,
        }
    }

    /// log every raw line at info (true) or debug (false)
    pub fn show_serial_data(mut self, show: bool) -> Self {
        self.show_serial_data = show;
        self
    }

    pub async fn run(mut self) {
        let name = self.source.describe();
        let mut reported_down = false;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let source = Arc::clone(&self.source);
            let opened = tokio::task::spawn_blocking(move || source.open())
                .await
                .unwrap_or_else(|e| Err(BridgeError::Io(std::io::Error::other(e.to_string()))));

            match opened {
                Ok(handles) => {
                    self.backoff.reset();
                    self.writer.install(handles.writer);
                    tracing::info!("Serial link connected: {}", name);
                    if self
                        .hub
                        .link_status(true, format!("serial link connected: {}", name))
                        .await
                        .is_err()
                    {
                        break;
                    }

                    let end = self.read_until_lost(handles.reader).await;
                    self.writer.clear();
                    match end {
                        ReadEnd::Shutdown => break,
                        ReadEnd::Lost(e) => {
                            tracing::warn!("Serial link lost: {}", e);
                            reported_down = true;
                            if self
                                .hub
                                .link_status(false, format!("serial link lost: {}", e))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to open {}: {}", name, e);
                    if !reported_down {
                        reported_down = true;
                        if self
                            .hub
                            .link_status(false, format!("serial link unavailable: {}", e))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }

            let delay = self.backoff.next_delay();
            tracing::info!("Reconnecting to {} in {:?}", name, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.writer.clear();
        tracing::info!("Link supervisor stopped");
    }

    async fn read_until_lost(&self, reader: Box<dyn Read + Send>) -> ReadEnd {
        let hub = self.hub.clone();
        let shutdown = self.shutdown.clone();
        let show = self.show_serial_data;
        tokio::task::spawn_blocking(move || read_lines(reader, &hub, &shutdown, show))
            .await
            .unwrap_or_else(|e| {
                ReadEnd::Lost(BridgeError::Io(std::io::Error::other(e.to_string())))
            })
    }
}

// blocking read loop; one line in, at most one frame out
fn read_lines(
    reader: Box<dyn Read + Send>,
    hub: &HubHandle,
    shutdown: &watch::Receiver<bool>,
    show_serial_data: bool,
) -> ReadEnd {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        if *shutdown.borrow() {
            return ReadEnd::Shutdown;
        }

        // on timeout the partial line stays in `line` and the next read appends
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return ReadEnd::Lost(BridgeError::LinkClosed),
            Ok(_) => {
                log_raw_line(&line, show_serial_data);
                let frame = classify_bytes(&line);
                line.clear();
                if let Some(frame) = frame {
                    if hub.blocking_publish(frame).is_err() {
                        return ReadEnd::Shutdown;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return ReadEnd::Lost(e.into()),
        }
    }
}

fn log_raw_line(line: &[u8], show: bool) {
    match std::str::from_utf8(line) {
        Ok(text) if show => tracing::info!("[SERIAL] {}", text.trim_end()),
        Ok(text) => tracing::debug!("[SERIAL] {}", text.trim_end()),
        Err(_) => {
            let hex: String = line.iter().map(|b| format!("{:02x}", b)).collect();
            tracing::debug!("[SERIAL] (binary) {}", hex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_writer_slot_appends_newline() {
        let slot = WriterSlot::default();
        assert!(matches!(slot.write_line("x"), Err(BridgeError::LinkDown)));

        let buffer = SharedBuffer::default();
        slot.install(Box::new(buffer.clone()));
        assert!(slot.is_connected());
        slot.write_line("routes").unwrap();
        slot.write_line("help").unwrap();
        assert_eq!(&*buffer.0.lock().unwrap(), b"routes\nhelp\n");

        slot.clear();
        assert!(!slot.is_connected());
    }

    #[test]
    fn test_read_lines_publishes_until_eof() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let (_tx, shutdown) = watch::channel(false);
        let input = b"{\"t\":\"a\",\"s\":1,\"r\":-30}\n\n[INFO] hello\n{\"t\":\"a\",\"s\":2,\"r\":-31}".to_vec();

        let end = read_lines(Box::new(Cursor::new(input)), &handle, &shutdown, false);
        assert!(matches!(end, ReadEnd::Lost(BridgeError::LinkClosed)));

        // frames were queued in the inbox; let the hub apply them
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let status = runtime.block_on(async {
            tokio::spawn(hub.run());
            handle.status().await.unwrap()
        });
        assert_eq!(status.stats.received, 2);
        assert_eq!(status.stats.expected, 2);
    }

    #[test]
    fn test_read_lines_stops_on_shutdown() {
        let (_hub, handle) = Hub::new(HubConfig::default());
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        let end = read_lines(Box::new(Cursor::new(b"x\n".to_vec())), &handle, &shutdown, false);
        assert!(matches!(end, ReadEnd::Shutdown));
    }
}
