// Windowed averaging to a lower sample rate

use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::graph::{Consumer, Downstream, Producer};
use crate::streaming::types::{StreamError, StreamResult};
use crate::streaming::window_buffer::{WindowBuffer, MAX_WINDOW_ROWS};
use async_trait::async_trait;
use std::sync::Arc;

/// Averages every `window` received envelopes into one.
///
/// Windows do not overlap: each flush consumes every buffered row. A partial
/// window left over when the transform closes is dropped.
pub struct DownsampleTransform {
    name: String,
    schema: Arc<ChannelSchema>,
    buffer: WindowBuffer,
    downstream: Downstream,
    emitted: u64,
    closed: bool,
}

impl DownsampleTransform {
    pub fn new(name: impl Into<String>, window: usize, schema: Arc<ChannelSchema>) -> StreamResult<Self> {
        Ok(Self {
            name: name.into(),
            schema,
            buffer: WindowBuffer::new(window)?,
            downstream: Downstream::new(),
            emitted: 0,
            closed: false,
        })
    }

    /// Window sized to turn `input_rate` into `target_rate`
    pub fn from_rates(
        name: impl Into<String>,
        input_rate: f64,
        target_rate: f64,
        schema: Arc<ChannelSchema>,
    ) -> StreamResult<Self> {
        let ratio = input_rate / target_rate;
        if !(target_rate > 0.0) || !input_rate.is_finite() || target_rate > input_rate {
            return Err(StreamError::InvalidConfig(format!(
                "cannot downsample {} Hz to {} Hz",
                input_rate, target_rate
            )));
        }
        if !ratio.is_finite() || ratio.round() > MAX_WINDOW_ROWS as f64 {
            return Err(StreamError::InvalidConfig(format!(
                "downsampling {} Hz to {} Hz needs a window over {} rows",
                input_rate, target_rate, MAX_WINDOW_ROWS
            )));
        }
        Self::new(name, ratio.round() as usize, schema)
    }

    pub fn window(&self) -> usize {
        self.buffer.capacity()
    }

    /// Envelopes emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    async fn flush(&mut self) -> StreamResult<()> {
        let mean = self.buffer.mean_row()?;
        self.buffer.reset();

        let envelope = SampleEnvelope::new(Arc::clone(&self.schema), mean)?;
        log::debug!("'{}' flushed a window of {}", self.name, self.window());
        self.emitted += 1;
        self.downstream.broadcast(Arc::new(envelope)).await
    }
}

#[async_trait]
impl Consumer for DownsampleTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, schema: &ChannelSchema) -> StreamResult<()> {
        if schema != self.schema.as_ref() {
            return Err(StreamError::SchemaMismatch(format!(
                "'{}' expects channels {:?}, got {:?}",
                self.name,
                self.schema.names(),
                schema.names()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        self.buffer.push(envelope.packet().to_vec());
        if self.buffer.is_ready() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.buffer.is_empty() {
            log::debug!(
                "'{}' dropped a partial window of {} rows",
                self.name,
                self.buffer.len()
            );
            self.buffer.reset();
        }
        self.downstream.close_all().await
    }
}

impl Producer for DownsampleTransform {
    fn output_schema(&self) -> Arc<ChannelSchema> {
        Arc::clone(&self.schema)
    }

    fn downstream_mut(&mut self) -> &mut Downstream {
        &mut self.downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::graph::ConsumerHandle;

    struct Collector {
        seen: Arc<parking_lot::Mutex<Vec<Vec<f64>>>>,
    }

    #[async_trait]
    impl Consumer for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
            self.seen.lock().push(envelope.packet().to_vec());
            Ok(())
        }

        async fn close(&mut self) -> StreamResult<()> {
            Ok(())
        }
    }

    fn setup(window: usize) -> (DownsampleTransform, Arc<parking_lot::Mutex<Vec<Vec<f64>>>>, Arc<ChannelSchema>) {
        let schema = ChannelSchema::numbered("ch", 2).into_shared();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut transform = DownsampleTransform::new("downsample", window, Arc::clone(&schema)).unwrap();
        transform
            .subscribe(ConsumerHandle::new(Collector { seen: Arc::clone(&seen) }))
            .unwrap();
        (transform, seen, schema)
    }

    fn envelope(schema: &Arc<ChannelSchema>, values: [f64; 2]) -> Arc<SampleEnvelope> {
        Arc::new(SampleEnvelope::new(Arc::clone(schema), values.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_emits_mean_on_last_row_of_window() {
        let (mut transform, seen, schema) = setup(3);
        transform.receive(envelope(&schema, [1.0, 10.0])).await.unwrap();
        transform.receive(envelope(&schema, [2.0, 20.0])).await.unwrap();
        assert!(seen.lock().is_empty());

        transform.receive(envelope(&schema, [3.0, 30.0])).await.unwrap();
        assert_eq!(*seen.lock(), vec![vec![2.0, 20.0]]);
        assert_eq!(transform.emitted(), 1);
    }

    #[tokio::test]
    async fn test_partial_window_dropped_on_close() {
        let (mut transform, seen, schema) = setup(4);
        for _ in 0..3 {
            transform.receive(envelope(&schema, [1.0, 1.0])).await.unwrap();
        }
        transform.close().await.unwrap();
        transform.close().await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_window_from_rates() {
        let schema = ChannelSchema::numbered("ch", 1).into_shared();
        let transform = DownsampleTransform::from_rates("d", 256.0, 1.0, Arc::clone(&schema)).unwrap();
        assert_eq!(transform.window(), 256);
        assert!(DownsampleTransform::from_rates("d", 10.0, 20.0, schema).is_err());
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let schema = ChannelSchema::numbered("ch", 1).into_shared();
        let result = DownsampleTransform::new("d", 1_000_000_000_000_000_000, Arc::clone(&schema));
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));

        for (input, target) in [
            (f64::INFINITY, 1.0),
            (f64::NAN, 1.0),
            (1e300, 1e-300),
            (1e12, 1.0),
        ] {
            let result = DownsampleTransform::from_rates("d", input, target, Arc::clone(&schema));
            assert!(
                matches!(result, Err(StreamError::InvalidConfig(_))),
                "{} Hz to {} Hz should be rejected",
                input,
                target
            );
        }
    }

    #[test]
    fn test_rejects_other_schema() {
        let (transform, _, _) = setup(2);
        assert!(transform.accepts(&ChannelSchema::numbered("x", 2)).is_err());
    }
}
