// Fixed-capacity rolling window of packet vectors
//
// Owned exclusively by one transform. Capacity is fixed at construction and
// the buffer never holds more than `capacity` rows: pushing into a full buffer
// discards the oldest row. The buffer also counts rows pushed since the last
// flush so a transform can keep history across flushes and still detect when a
// complete window of new rows has arrived.

use crate::streaming::types::{StreamError, StreamResult};
use std::collections::VecDeque;

/// Largest window a buffer accepts, a little over 18 hours at 256 Hz
pub const MAX_WINDOW_ROWS: usize = 1 << 24;

/// Rows reserved up front; larger windows grow as rows arrive
const PREALLOCATED_ROWS: usize = 4096;

#[derive(Debug, Clone)]
pub struct WindowBuffer {
    rows: VecDeque<Vec<f64>>,
    capacity: usize,
    fresh: usize,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> StreamResult<Self> {
        if capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "window capacity must be at least 1".to_string(),
            ));
        }
        if capacity > MAX_WINDOW_ROWS {
            return Err(StreamError::InvalidConfig(format!(
                "window capacity {} exceeds the limit of {} rows",
                capacity, MAX_WINDOW_ROWS
            )));
        }
        Ok(Self {
            rows: VecDeque::with_capacity(capacity.min(PREALLOCATED_ROWS)),
            capacity,
            fresh: 0,
        })
    }

    /// Append a row, discarding the oldest one if the buffer is full
    pub fn push(&mut self, row: Vec<f64>) {
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(row);
        self.fresh = (self.fresh + 1).min(self.capacity);
    }

    pub fn extend<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        for row in rows {
            self.push(row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Holds `capacity` rows
    pub fn is_full(&self) -> bool {
        self.rows.len() == self.capacity
    }

    /// `capacity` rows have been pushed since the last flush
    pub fn is_ready(&self) -> bool {
        self.fresh == self.capacity
    }

    /// Rows pushed since the last flush
    pub fn fresh_len(&self) -> usize {
        self.fresh
    }

    /// Rows ordered oldest to newest
    pub fn rows(&self) -> impl Iterator<Item = &Vec<f64>> + '_ {
        self.rows.iter()
    }

    /// Values of one channel, oldest to newest
    pub fn column(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index).copied())
    }

    pub fn to_vec(&self) -> Vec<Vec<f64>> {
        self.rows.iter().cloned().collect()
    }

    /// Element-wise arithmetic mean over every buffered row
    pub fn mean_row(&self) -> StreamResult<Vec<f64>> {
        let width = match self.rows.front() {
            Some(row) => row.len(),
            None => {
                return Err(StreamError::InvalidConfig(
                    "cannot average an empty window".to_string(),
                ))
            }
        };

        let mut sums = vec![0.0; width];
        for row in &self.rows {
            if row.len() != width {
                return Err(StreamError::SchemaMismatch(format!(
                    "window mixes rows of width {} and {}",
                    width,
                    row.len()
                )));
            }
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += value;
            }
        }

        let count = self.rows.len() as f64;
        Ok(sums.into_iter().map(|s| s / count).collect())
    }

    /// Drop every row and start a new window
    pub fn reset(&mut self) {
        self.rows.clear();
        self.fresh = 0;
    }

    /// Keep only the newest `keep` rows and start a new window
    pub fn retain_last(&mut self, keep: usize) {
        let excess = self.rows.len().saturating_sub(keep);
        self.rows.drain(..excess);
        self.fresh = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(WindowBuffer::new(0).is_err());
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        let result = WindowBuffer::new(1_000_000_000_000_000_000);
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
        assert!(WindowBuffer::new(usize::MAX).is_err());

        let buffer = WindowBuffer::new(MAX_WINDOW_ROWS).unwrap();
        assert_eq!(buffer.capacity(), MAX_WINDOW_ROWS);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buffer = WindowBuffer::new(3).unwrap();
        for i in 0..5 {
            buffer.push(vec![i as f64]);
        }
        assert_eq!(buffer.len(), 3);
        assert!(buffer.is_full());
        let first: Vec<f64> = buffer.column(0).collect();
        assert_eq!(first, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mean_row() {
        let mut buffer = WindowBuffer::new(2).unwrap();
        buffer.push(vec![1.0, 2.0]);
        buffer.push(vec![3.0, 4.0]);
        assert_eq!(buffer.mean_row().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_row_rejects_ragged_rows() {
        let mut buffer = WindowBuffer::new(2).unwrap();
        buffer.push(vec![1.0, 2.0]);
        buffer.push(vec![3.0]);
        assert!(matches!(
            buffer.mean_row(),
            Err(StreamError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_retain_last_restarts_fresh_count() {
        let mut buffer = WindowBuffer::new(4).unwrap();
        buffer.extend((0..4).map(|i| vec![i as f64]));
        assert!(buffer.is_ready());

        buffer.retain_last(3);
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_full());
        assert!(!buffer.is_ready());

        // One new row makes the buffer full again but not ready
        buffer.push(vec![10.0]);
        assert!(buffer.is_full());
        assert!(!buffer.is_ready());

        buffer.extend((11..14).map(|i| vec![i as f64]));
        assert!(buffer.is_ready());
        let values: Vec<f64> = buffer.column(0).collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_reset_empties_buffer() {
        let mut buffer = WindowBuffer::new(2).unwrap();
        buffer.push(vec![1.0]);
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.fresh_len(), 0);
    }
}
