// Constant-factor scaling

use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::graph::{Consumer, Downstream, Producer};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Emits a new envelope whose packet is the received packet times `factor`
pub struct ScaleTransform {
    name: String,
    factor: f64,
    schema: Arc<ChannelSchema>,
    downstream: Downstream,
    closed: bool,
}

impl ScaleTransform {
    pub fn new(name: impl Into<String>, factor: f64, schema: Arc<ChannelSchema>) -> StreamResult<Self> {
        if !factor.is_finite() {
            return Err(StreamError::InvalidConfig(format!(
                "scale factor must be finite, got {}",
                factor
            )));
        }
        Ok(Self {
            name: name.into(),
            factor,
            schema,
            downstream: Downstream::new(),
            closed: false,
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

#[async_trait]
impl Consumer for ScaleTransform {
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
        let packet = envelope.packet().iter().map(|v| v * self.factor).collect();
        let scaled = SampleEnvelope::with_timestamp(envelope.timestamp(), Arc::clone(&self.schema), packet)?;
        self.downstream.broadcast(Arc::new(scaled)).await
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.downstream.close_all().await
    }
}

impl Producer for ScaleTransform {
    fn output_schema(&self) -> Arc<ChannelSchema> {
        Arc::clone(&self.schema)
    }

    fn downstream_mut(&mut self) -> &mut Downstream {
        &mut self.downstream
    }
}
