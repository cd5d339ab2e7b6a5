//! Packet reception accounting.
//!
//! Every frame from the node carries a sequence number. A forward jump counts
//! the skipped numbers as lost; a repeated or older number (retransmission,
//! reordering) counts as received without growing the expected total, which
//! is why `received` may overtake `expected` and the ratio is clamped.

use crate::domain::{SensorEvent, Stats};

#[derive(Debug, Default, Clone)]
pub struct PacketStats {
    last_seq: Option<u32>,
    expected: u64,
    received: u64,
    button_count: u64,
}

impl PacketStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// account for one decoded frame and return the updated snapshot
    pub fn record(&mut self, event: &SensorEvent) -> Stats {
        self.record_seq(event.seq());
        if event.is_button() {
            self.button_count += 1;
        }
        self.snapshot()
    }

    fn record_seq(&mut self, seq: u32) {
        match self.last_seq {
            None => {
                self.last_seq = Some(seq);
                self.expected = 1;
                self.received = 1;
            }
            Some(last) if seq > last => {
                self.expected += u64::from(seq - last);
                self.received += 1;
                self.last_seq = Some(seq);
            }
            Some(_) => {
                self.received += 1;
            }
        }
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            received: self.received,
            expected: self.expected,
            prr: reception_ratio(self.received, self.expected),
            button_count: self.button_count,
        }
    }
}

/// received / expected in percent, clamped to [0, 100], one decimal place
fn reception_ratio(received: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 100.0;
    }
    let ratio = (received as f64 / expected as f64 * 100.0).clamp(0.0, 100.0);
    (ratio * 10.0).round() / 10.0
}
