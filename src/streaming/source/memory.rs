// In-memory replay, mostly for tests and embedding

use super::{Acquired, Acquisition, SourceMetadata};
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::types::StreamResult;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Replays a fixed list of packets, then reports end of stream
pub struct MemoryAcquisition {
    schema: Arc<ChannelSchema>,
    rows: VecDeque<Vec<f64>>,
    sample_rate: f64,
}

impl MemoryAcquisition {
    /// Rows are delivered unpaced
    pub fn new(schema: ChannelSchema, rows: Vec<Vec<f64>>) -> Self {
        Self {
            schema: schema.into_shared(),
            rows: rows.into(),
            sample_rate: 0.0,
        }
    }

    /// Pace delivery at `sample_rate` envelopes per second
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

#[async_trait]
impl Acquisition for MemoryAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        match self.rows.pop_front() {
            Some(row) => Ok(Acquired::Sample(SampleEnvelope::new(
                Arc::clone(&self.schema),
                row,
            )?)),
            None => Ok(Acquired::EndOfStream),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.rows.clear();
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: self.sample_rate > 0.0,
            properties: HashMap::new(),
        }
    }
}
