//! Bounded rssi history for the dashboard chart.

use std::collections::VecDeque;

use crate::domain::SignalSample;

pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// FIFO window of the most recent samples, in arrival order
#[derive(Debug, Clone)]
pub struct SignalHistory {
    samples: VecDeque<SignalSample>,
    capacity: usize,
}

impl SignalHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: SignalSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn snapshot(&self) -> Vec<SignalSample> {
        self.samples.iter().copied().collect()
    }
}

impl Default for SignalHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_sixty_in_arrival_order() {
        let mut history = SignalHistory::default();
        for i in 0..61u32 {
            history.push(SignalSample {
                seq: i,
                rssi: -(i as i32),
            });
        }
        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 60);
        assert_eq!(snapshot.first().map(|s| s.seq), Some(1));
        assert_eq!(snapshot.last().map(|s| s.seq), Some(60));
    }

    #[test]
    fn test_arrival_order_not_sequence_order() {
        let mut history = SignalHistory::new(3);
        for seq in [9, 4, 7] {
            history.push(SignalSample { seq, rssi: -40 });
        }
        let seqs: Vec<u32> = history.snapshot().iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![9, 4, 7]);
    }
}
