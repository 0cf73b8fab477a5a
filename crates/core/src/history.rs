use std::collections::VecDeque;

/// Number of samples kept for the plot.
pub const HISTORY_SIZE: usize = 100;

/// One plot sample; time is the implicit index, not stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySample {
    pub temperature: f32,
    pub heating: f32,
}

/// Fixed-capacity FIFO of telemetry samples feeding the live chart.
///
/// Temperature and heating are kept as twin buffers so the chart gets two
/// parallel series with index correspondence intact; evicting the oldest
/// sample pops the front of both.
#[derive(Debug)]
pub struct HistoryBuffer {
    temperature: VecDeque<f32>,
    heating: VecDeque<f32>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            temperature: VecDeque::with_capacity(capacity),
            heating: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// O(1): evicts the single oldest sample once full, then appends.
    pub fn push(&mut self, sample: HistorySample) {
        if self.temperature.len() == self.capacity {
            self.temperature.pop_front();
            self.heating.pop_front();
        }
        self.temperature.push_back(sample.temperature);
        self.heating.push_back(sample.heating);
    }

    pub fn len(&self) -> usize {
        self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty()
    }

    /// Snapshot of the twin series in arrival order, oldest first.
    pub fn to_series(&self) -> (Vec<f32>, Vec<f32>) {
        (
            self.temperature.iter().copied().collect(),
            self.heating.iter().copied().collect(),
        )
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}
