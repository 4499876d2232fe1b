// Producer/consumer capabilities and ordered fan-out
//
// Every node that receives envelopes implements `Consumer`. Every node that
// emits envelopes implements `Producer` by owning a `Downstream` set. A
// transform implements both. Consumers are shared behind a tokio mutex so a
// sink connected to several independent sources still sees one `receive` at a
// time.

use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Anything that accepts envelopes: transforms and sinks
#[async_trait]
pub trait Consumer: Send {
    /// Label used in logs and delivery errors
    fn name(&self) -> &str;

    /// Called once per edge while the graph is wired, never per envelope.
    /// Reject producers whose channel schema this consumer cannot handle.
    fn accepts(&self, _schema: &ChannelSchema) -> StreamResult<()> {
        Ok(())
    }

    /// Handle one envelope. The envelope is shared with sibling consumers and
    /// must not be modified.
    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()>;

    /// Flush and release resources. Must be idempotent and safe to call when
    /// `receive` was never called.
    async fn close(&mut self) -> StreamResult<()>;
}

#[async_trait]
impl<T: Consumer + ?Sized> Consumer for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn accepts(&self, schema: &ChannelSchema) -> StreamResult<()> {
        (**self).accepts(schema)
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        (**self).receive(envelope).await
    }

    async fn close(&mut self) -> StreamResult<()> {
        (**self).close().await
    }
}

/// Anything that emits envelopes: sources and transforms
pub trait Producer {
    /// Channel schema of every envelope this producer emits
    fn output_schema(&self) -> Arc<ChannelSchema>;

    fn downstream_mut(&mut self) -> &mut Downstream;

    /// Append a consumer to the fan-out set. Consumers receive envelopes in
    /// the order they were subscribed.
    fn subscribe(&mut self, consumer: ConsumerHandle) -> StreamResult<()> {
        let schema = self.output_schema();
        self.downstream_mut().connect(consumer, &schema)
    }
}

/// Shared, lockable reference to a consumer node
#[derive(Clone)]
pub struct ConsumerHandle {
    name: Arc<str>,
    inner: Arc<Mutex<dyn Consumer>>,
}

impl ConsumerHandle {
    pub fn new<C: Consumer + 'static>(consumer: C) -> Self {
        Self::shared(consumer).0
    }

    /// Wrap a consumer and keep a typed reference to it, e.g. to inspect a
    /// sink's counters after a run.
    pub fn shared<C: Consumer + 'static>(consumer: C) -> (Self, Arc<Mutex<C>>) {
        let name: Arc<str> = Arc::from(consumer.name());
        let typed = Arc::new(Mutex::new(consumer));
        let inner: Arc<Mutex<dyn Consumer>> = typed.clone();
        (Self { name, inner }, typed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both handles point at the same node
    pub fn same_node(&self, other: &ConsumerHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.inner) as *const (),
            Arc::as_ptr(&other.inner) as *const (),
        )
    }

    fn check_schema(&self, schema: &ChannelSchema) -> StreamResult<()> {
        let consumer = self.inner.try_lock().map_err(|_| {
            StreamError::InvalidConfig(format!(
                "cannot wire '{}' while it is receiving data",
                self.name
            ))
        })?;
        consumer.accepts(schema)
    }

    pub async fn receive(&self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        self.inner.lock().await.receive(envelope).await
    }

    pub async fn close(&self) -> StreamResult<()> {
        self.inner.lock().await.close().await
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Ordered set of consumers fed by one producer
#[derive(Debug, Clone, Default)]
pub struct Downstream {
    consumers: Vec<ConsumerHandle>,
}

impl Downstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the consumer against the producer's schema and append it
    pub fn connect(&mut self, consumer: ConsumerHandle, schema: &ChannelSchema) -> StreamResult<()> {
        consumer.check_schema(schema)?;
        log::debug!("Connected '{}' ({} channels)", consumer.name(), schema.len());
        self.consumers.push(consumer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.consumers.iter().map(ConsumerHandle::name).collect()
    }

    /// Deliver one envelope to every consumer in connection order.
    ///
    /// Each `receive` completes before the next consumer is called. The first
    /// failure stops the broadcast; consumers already called keep what they
    /// received.
    pub async fn broadcast(&self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        for consumer in &self.consumers {
            consumer
                .receive(Arc::clone(&envelope))
                .await
                .map_err(|e| StreamError::delivery(consumer.name(), e))?;
        }
        Ok(())
    }

    /// Close every consumer, continuing past failures. Returns the first error.
    pub async fn close_all(&self) -> StreamResult<()> {
        let mut first_error = None;
        for consumer in &self.consumers {
            if let Err(e) = consumer.close().await {
                log::warn!("Failed to close '{}': {}", consumer.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::envelope::ChannelSchema;

    struct Recorder {
        name: String,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Consumer for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn accepts(&self, schema: &ChannelSchema) -> StreamResult<()> {
            if schema.is_empty() {
                return Err(StreamError::SchemaMismatch("no channels".to_string()));
            }
            Ok(())
        }

        async fn receive(&mut self, _envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
            self.log.lock().push(self.name.clone());
            if self.fail {
                return Err(StreamError::Network("unreachable".to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) -> StreamResult<()> {
            Ok(())
        }
    }

    fn recorder(name: &str, log: &Arc<parking_lot::Mutex<Vec<String>>>, fail: bool) -> ConsumerHandle {
        ConsumerHandle::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
        })
    }

    fn envelope() -> Arc<SampleEnvelope> {
        let schema = ChannelSchema::numbered("ch", 1).into_shared();
        Arc::new(SampleEnvelope::new(schema, vec![1.0]).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_follows_connection_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let schema = ChannelSchema::numbered("ch", 1);
        let mut downstream = Downstream::new();
        for name in ["a", "b", "c"] {
            downstream.connect(recorder(name, &log, false), &schema).unwrap();
        }

        downstream.broadcast(envelope()).await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_stops_broadcast_and_names_consumer() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let schema = ChannelSchema::numbered("ch", 1);
        let mut downstream = Downstream::new();
        downstream.connect(recorder("a", &log, false), &schema).unwrap();
        downstream.connect(recorder("b", &log, true), &schema).unwrap();
        downstream.connect(recorder("c", &log, false), &schema).unwrap();

        let err = downstream.broadcast(envelope()).await.unwrap_err();
        assert!(matches!(err, StreamError::Delivery { ref consumer, .. } if consumer == "b"));
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_schema_checked_when_wiring() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut downstream = Downstream::new();
        let result = downstream.connect(recorder("a", &log, false), &ChannelSchema::new(Vec::<String>::new()));
        assert!(result.is_err());
        assert!(downstream.is_empty());
    }
}
