// Per-node bucket buffer with ring-buffer eviction
use serde::Serialize;
use std::collections::VecDeque;

/// One fixed-width bucket. `value == None` is a gap, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    pub timestamp: i64,
    pub value: Option<f64>,
}

impl Bucket {
    pub fn new(timestamp: i64, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("segment at {start} would be written before buffer front {front}")]
    BeforeFront { start: i64, front: i64 },
    #[error("segment at {start} is off the {step}s bucket grid anchored at {front}")]
    OffGrid { start: i64, step: i64, front: i64 },
}

/// Bounded, gap-aware buffer of buckets for one node.
///
/// The buffer is always a contiguous run of the bucket grid: timestamps are
/// strictly increasing and exactly `step` apart, missing data is stored as
/// explicit gaps.
#[derive(Debug, Clone)]
pub struct NodeStream {
    node_id: String,
    step: i64,
    capacity: usize,
    buffer: VecDeque<Bucket>,
    consecutive_failures: u32,
}

impl NodeStream {
    pub fn new(node_id: impl Into<String>, step: i64, capacity: usize) -> Self {
        Self {
            node_id: node_id.into(),
            step,
            capacity: capacity.max(1),
            buffer: VecDeque::with_capacity(capacity.max(1)),
            consecutive_failures: 0,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buffer.iter()
    }

    pub fn to_vec(&self) -> Vec<Bucket> {
        self.buffer.iter().copied().collect()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn value_at(&self, timestamp: i64) -> Option<f64> {
        self.index_of(timestamp)
            .and_then(|idx| self.buffer.get(idx))
            .and_then(|b| b.value)
    }

    /// Timestamp of the newest bucket holding a value.
    pub fn last_populated(&self) -> Option<i64> {
        self.buffer
            .iter()
            .rev()
            .find(|b| b.value.is_some())
            .map(|b| b.timestamp)
    }

    /// Write `values` at `start, start + step, ...`. Already present buckets are
    /// overwritten, newer ones appended. Nothing is written on error.
    pub fn write_segment(
        &mut self,
        start: i64,
        values: &[f64],
        window_start: i64,
    ) -> Result<usize, BufferError> {
        self.check_segment(start)?;
        for (i, value) in values.iter().enumerate() {
            let ts = start + i as i64 * self.step;
            self.put(ts, Some(*value), true);
        }
        self.evict(window_start);
        Ok(values.len())
    }

    /// Record `count` buckets from `start` as gaps. Buckets that already exist
    /// keep their value. Returns the number of gaps appended.
    pub fn mark_missing(
        &mut self,
        start: i64,
        count: usize,
        window_start: i64,
    ) -> Result<usize, BufferError> {
        self.check_segment(start)?;
        let mut appended = 0;
        for i in 0..count {
            let ts = start + i as i64 * self.step;
            if self.put(ts, None, false) {
                appended += 1;
            }
        }
        self.evict(window_start);
        Ok(appended)
    }

    /// Append gaps after the tail for every bucket before `stop`.
    pub fn pad_to(&mut self, stop: i64, window_start: i64) -> usize {
        let Some(tail) = self.buffer.back().map(|b| b.timestamp) else {
            return 0;
        };
        let mut appended = 0;
        let mut next = tail + self.step;
        while next < stop {
            self.put(next, None, false);
            appended += 1;
            next += self.step;
        }
        self.evict(window_start);
        appended
    }

    /// Drop buckets older than `window_start`, then anything beyond capacity.
    pub fn evict(&mut self, window_start: i64) {
        while self
            .buffer
            .front()
            .is_some_and(|b| b.timestamp < window_start)
        {
            self.buffer.pop_front();
        }
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Returns true when the failure streak starts.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures == 1
    }

    /// Returns true when a failure streak ends.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.consecutive_failures > 0;
        self.consecutive_failures = 0;
        recovered
    }

    fn check_segment(&self, start: i64) -> Result<(), BufferError> {
        let Some(front) = self.buffer.front().map(|b| b.timestamp) else {
            return Ok(());
        };
        if start < front {
            return Err(BufferError::BeforeFront { start, front });
        }
        if (start - front) % self.step != 0 {
            return Err(BufferError::OffGrid {
                start,
                step: self.step,
                front,
            });
        }
        Ok(())
    }

    fn index_of(&self, timestamp: i64) -> Option<usize> {
        let front = self.buffer.front()?.timestamp;
        if timestamp < front || (timestamp - front) % self.step != 0 {
            return None;
        }
        let idx = ((timestamp - front) / self.step) as usize;
        (idx < self.buffer.len()).then_some(idx)
    }

    // Returns true if a new bucket was appended.
    fn put(&mut self, ts: i64, value: Option<f64>, overwrite: bool) -> bool {
        if let Some(idx) = self.index_of(ts) {
            if overwrite {
                self.buffer[idx].value = value;
            }
            return false;
        }
        if let Some(tail) = self.buffer.back().map(|b| b.timestamp) {
            let mut next = tail + self.step;
            // Oldest bucket that survives capacity eviction once `ts` lands.
            let horizon = ts - (self.capacity as i64 - 1) * self.step;
            if next < horizon {
                self.buffer.clear();
                next = horizon;
            }
            while next < ts {
                self.buffer.push_back(Bucket::new(next, None));
                next += self.step;
            }
        }
        self.buffer.push_back(Bucket::new(ts, value));
        true
    }
}
