// UDP forwarding through an explicit connection pool
//
// The pool keeps one UDP client per destination port. Every forwarding sink
// built against the same pool sends each message to every client in it, so
// adding a second sink on a new port fans the whole stream out to both ports.

use crate::streaming::envelope::SampleEnvelope;
use crate::streaming::graph::Consumer;
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};

/// Default forwarding port
pub const DEFAULT_FORWARD_PORT: u16 = 1337;

/// Default message address
pub const DEFAULT_FORWARD_ADDRESS: &str = "/eeg";

struct Client {
    socket: UdpSocket,
    target: SocketAddr,
}

/// One UDP client per port, owned by whoever builds the graph
#[derive(Default)]
pub struct ForwardingPool {
    clients: Mutex<BTreeMap<u16, Arc<Client>>>,
}

impl ForwardingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a client for `port` exists. The first registration of a port
    /// decides its host.
    pub async fn register(&self, host: &str, port: u16) -> StreamResult<()> {
        if self.clients.lock().contains_key(&port) {
            return Ok(());
        }

        let target = lookup_host((host, port))
            .await
            .map_err(|e| StreamError::Network(format!("cannot resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| StreamError::Network(format!("no address for {}:{}", host, port)))?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| StreamError::Network(format!("UDP bind failed: {}", e)))?;

        self.clients
            .lock()
            .entry(port)
            .or_insert_with(|| Arc::new(Client { socket, target }));
        log::debug!("Forwarding pool registered {}", target);
        Ok(())
    }

    pub fn ports(&self) -> Vec<u16> {
        self.clients.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Send one datagram to every client
    pub async fn send_all(&self, payload: &[u8]) -> StreamResult<()> {
        let clients: Vec<Arc<Client>> = self.clients.lock().values().cloned().collect();
        for client in clients {
            client
                .socket
                .send_to(payload, client.target)
                .await
                .map_err(|e| StreamError::Network(format!("UDP send to {} failed: {}", client.target, e)))?;
        }
        Ok(())
    }
}

/// Datagram payload
#[derive(Debug, Serialize)]
struct ForwardMessage<'a> {
    address: &'a str,
    args: &'a [f64],
}

/// Forwards the packet to `address`, and with `multi_channel` each channel
/// value to `address/<channel>`
pub struct UdpForwardSink {
    name: String,
    pool: Arc<ForwardingPool>,
    address: String,
    multi_channel: bool,
    forwarded: u64,
}

impl UdpForwardSink {
    /// Registers `host:port` with the pool
    pub async fn new(
        name: impl Into<String>,
        pool: Arc<ForwardingPool>,
        host: &str,
        port: u16,
        address: impl Into<String>,
        multi_channel: bool,
    ) -> StreamResult<Self> {
        pool.register(host, port).await?;
        Ok(Self {
            name: name.into(),
            pool,
            address: address.into(),
            multi_channel,
            forwarded: 0,
        })
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    async fn send(&self, address: &str, args: &[f64]) -> StreamResult<()> {
        let payload = serde_json::to_vec(&ForwardMessage { address, args })?;
        self.pool.send_all(&payload).await
    }
}

#[async_trait]
impl Consumer for UdpForwardSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        if self.multi_channel {
            for (channel, value) in envelope.channels() {
                let address = format!("{}/{}", self.address, channel);
                self.send(&address, &[value]).await?;
            }
        }
        self.send(&self.address, envelope.packet()).await?;
        self.forwarded += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::envelope::ChannelSchema;

    #[tokio::test]
    async fn test_pool_keeps_one_client_per_port() {
        let pool = ForwardingPool::new();
        pool.register("127.0.0.1", 9001).await.unwrap();
        pool.register("127.0.0.1", 9001).await.unwrap();
        pool.register("127.0.0.1", 9002).await.unwrap();
        assert_eq!(pool.ports(), vec![9001, 9002]);
    }

    #[tokio::test]
    async fn test_forwards_packet_and_channels() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let pool = Arc::new(ForwardingPool::new());
        let mut sink = UdpForwardSink::new("udp", pool, "127.0.0.1", port, "/eeg", true)
            .await
            .unwrap();

        let schema = ChannelSchema::new(["TP9", "AF7"]).into_shared();
        let envelope = SampleEnvelope::new(schema, vec![1.0, 2.0]).unwrap();
        sink.receive(Arc::new(envelope)).await.unwrap();

        let mut buf = [0u8; 1024];
        let mut messages = Vec::new();
        for _ in 0..3 {
            let n = receiver.recv(&mut buf).await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
            messages.push(value["address"].as_str().unwrap().to_string());
        }
        assert_eq!(messages, vec!["/eeg/TP9", "/eeg/AF7", "/eeg"]);
        assert_eq!(sink.forwarded(), 1);
    }
}
