// Live device back-ends
//
// A live device delivers at its own rate, so these acquisitions are never
// paced by the source loop. Both distinguish a device that never became ready
// (`AcquisitionFailure` from `open`) from one that went silent or disconnected
// mid-run (`StreamInterrupted` from `next`).

use super::{Acquired, Acquisition, SourceMetadata};
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const DEVICE_CHANNEL_CAPACITY: usize = 1024;

/// Message from a device driver to its acquisition
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected,
    Packet(Vec<f64>),
    Disconnected,
}

/// Sender half handed to the device driver
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    sender: mpsc::Sender<DeviceEvent>,
}

impl DeviceHandle {
    async fn send(&self, event: DeviceEvent) -> StreamResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| StreamError::Cancelled)
    }

    pub async fn connected(&self) -> StreamResult<()> {
        self.send(DeviceEvent::Connected).await
    }

    /// Forward one sample. Extra trailing values beyond the channel count are
    /// dropped by the acquisition.
    pub async fn packet(&self, values: Vec<f64>) -> StreamResult<()> {
        self.send(DeviceEvent::Packet(values)).await
    }

    pub async fn disconnected(&self) -> StreamResult<()> {
        self.send(DeviceEvent::Disconnected).await
    }

    /// Non-async variant for drivers running on their own threads
    pub fn blocking_packet(&self, values: Vec<f64>) -> StreamResult<()> {
        self.sender
            .blocking_send(DeviceEvent::Packet(values))
            .map_err(|_| StreamError::Cancelled)
    }
}

fn packet_envelope(schema: &Arc<ChannelSchema>, mut values: Vec<f64>) -> StreamResult<SampleEnvelope> {
    if values.len() > schema.len() {
        values.truncate(schema.len());
    }
    SampleEnvelope::new(Arc::clone(schema), values)
}

/// Live device fed through a `DeviceHandle`
pub struct ChannelDeviceAcquisition {
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    inactivity: Duration,
    connect_timeout: Duration,
    receiver: mpsc::Receiver<DeviceEvent>,
    pending: VecDeque<Vec<f64>>,
    connected: bool,
}

impl ChannelDeviceAcquisition {
    pub fn new(
        schema: ChannelSchema,
        sample_rate: f64,
        inactivity: Duration,
        connect_timeout: Duration,
    ) -> (Self, DeviceHandle) {
        let (sender, receiver) = mpsc::channel(DEVICE_CHANNEL_CAPACITY);
        let acquisition = Self {
            schema: schema.into_shared(),
            sample_rate,
            inactivity,
            connect_timeout,
            receiver,
            pending: VecDeque::new(),
            connected: false,
        };
        (acquisition, DeviceHandle { sender })
    }

    async fn wait_for_connection(&mut self) -> StreamResult<()> {
        match self.receiver.recv().await {
            Some(DeviceEvent::Connected) => Ok(()),
            // Data implies a connection even if the driver never said so
            Some(DeviceEvent::Packet(values)) => {
                self.pending.push_back(values);
                Ok(())
            }
            Some(DeviceEvent::Disconnected) | None => Err(StreamError::AcquisitionFailure(
                "device disconnected before becoming ready".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Acquisition for ChannelDeviceAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        if self.connected {
            return Ok(());
        }
        match timeout(self.connect_timeout, self.wait_for_connection()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::AcquisitionFailure(format!(
                    "device did not connect within {:.1}s",
                    self.connect_timeout.as_secs_f64()
                )))
            }
        }
        self.connected = true;
        log::info!("Device connected ({} channels)", self.schema.len());
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        if let Some(values) = self.pending.pop_front() {
            return Ok(Acquired::Sample(packet_envelope(&self.schema, values)?));
        }

        loop {
            let event = timeout(self.inactivity, self.receiver.recv())
                .await
                .map_err(|_| {
                    log::error!("no longer receiving data from device");
                    StreamError::StreamInterrupted(format!(
                        "no data for {:.1}s",
                        self.inactivity.as_secs_f64()
                    ))
                })?;

            match event {
                Some(DeviceEvent::Packet(values)) => {
                    return Ok(Acquired::Sample(packet_envelope(&self.schema, values)?))
                }
                Some(DeviceEvent::Connected) => continue,
                Some(DeviceEvent::Disconnected) | None => {
                    self.connected = false;
                    return Err(StreamError::StreamInterrupted(
                        "device disconnected".to_string(),
                    ));
                }
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.connected = false;
        self.pending.clear();
        self.receiver.close();
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: false,
            properties: HashMap::new(),
        }
    }
}

/// One line of the device's TCP protocol
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceMessage {
    Packet(Vec<f64>),
    Record { packet: Vec<f64> },
}

impl DeviceMessage {
    fn into_packet(self) -> Vec<f64> {
        match self {
            DeviceMessage::Packet(values) | DeviceMessage::Record { packet: values } => values,
        }
    }
}

/// Live device streaming newline-delimited JSON samples over TCP.
///
/// Each line is either a bare array of channel values or an object with a
/// `packet` array. Lines that fail to parse are logged and skipped.
pub struct TcpDeviceAcquisition {
    host: String,
    port: u16,
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    inactivity: Duration,
    connect_timeout: Duration,
    lines: Option<Lines<BufReader<OwnedReadHalf>>>,
}

impl TcpDeviceAcquisition {
    pub fn new(
        host: String,
        port: u16,
        schema: ChannelSchema,
        sample_rate: f64,
        inactivity: Duration,
        connect_timeout: Duration,
    ) -> StreamResult<Self> {
        if schema.is_empty() {
            return Err(StreamError::InvalidConfig(
                "TCP device needs at least one channel".to_string(),
            ));
        }
        Ok(Self {
            host,
            port,
            schema: schema.into_shared(),
            sample_rate,
            inactivity,
            connect_timeout,
            lines: None,
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Acquisition for TcpDeviceAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        if self.lines.is_some() {
            return Ok(());
        }

        let addr = self.address();
        log::info!("Connecting to TCP device: {}", addr);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(StreamError::AcquisitionFailure(format!(
                    "TCP connection to {} failed: {}",
                    addr, e
                )))
            }
            Err(_) => {
                return Err(StreamError::AcquisitionFailure(format!(
                    "TCP connection to {} timed out",
                    addr
                )))
            }
        };

        // Samples are read only; the write half is dropped
        let (read_half, _) = stream.into_split();
        self.lines = Some(BufReader::new(read_half).lines());
        log::info!("TCP device connected");
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        let inactivity = self.inactivity;
        let Some(lines) = self.lines.as_mut() else {
            return Err(StreamError::InvalidConfig(
                "TCP device read before open".to_string(),
            ));
        };

        loop {
            let line = match timeout(inactivity, lines.next_line()).await {
                Err(_) => {
                    return Err(StreamError::StreamInterrupted(format!(
                        "no data for {:.1}s",
                        inactivity.as_secs_f64()
                    )))
                }
                Ok(Err(e)) => {
                    return Err(StreamError::StreamInterrupted(format!("TCP read error: {}", e)))
                }
                Ok(Ok(None)) => {
                    log::info!("TCP connection closed by device");
                    return Err(StreamError::StreamInterrupted(
                        "connection closed by device".to_string(),
                    ));
                }
                Ok(Ok(Some(line))) => line,
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<DeviceMessage>(line) {
                Ok(message) => {
                    return Ok(Acquired::Sample(packet_envelope(
                        &self.schema,
                        message.into_packet(),
                    )?))
                }
                Err(e) => log::error!("Failed to parse TCP message: {}", e),
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.lines.take().is_some() {
            log::info!("Closed TCP device {}", self.address());
        }
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: false,
            properties: [("address".to_string(), self.address())]
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ChannelSchema {
        ChannelSchema::new(["TP9", "AF7", "AF8", "TP10"])
    }

    #[tokio::test]
    async fn test_never_connected_fails_at_open() {
        let (mut acquisition, _handle) = ChannelDeviceAcquisition::new(
            schema(),
            256.0,
            Duration::from_millis(50),
            Duration::from_millis(20),
        );
        assert!(matches!(
            acquisition.open().await,
            Err(StreamError::AcquisitionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_silence_after_connect_is_interruption() {
        let (mut acquisition, handle) = ChannelDeviceAcquisition::new(
            schema(),
            256.0,
            Duration::from_millis(30),
            Duration::from_millis(100),
        );
        handle.connected().await.unwrap();
        handle.packet(vec![1.0, 2.0, 3.0, 4.0, 99.0]).await.unwrap();
        acquisition.open().await.unwrap();

        match acquisition.next().await.unwrap() {
            Acquired::Sample(envelope) => assert_eq!(envelope.packet(), &[1.0, 2.0, 3.0, 4.0]),
            Acquired::EndOfStream => panic!("device streams never end"),
        }

        let err = acquisition.next().await.unwrap_err();
        assert!(matches!(err, StreamError::StreamInterrupted(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_tcp_connection_refused_is_acquisition_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut acquisition = TcpDeviceAcquisition::new(
            "127.0.0.1".to_string(),
            port,
            schema(),
            256.0,
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(
            acquisition.open().await,
            Err(StreamError::AcquisitionFailure(_))
        ));
    }

    #[test]
    fn test_device_message_shapes() {
        let bare: DeviceMessage = serde_json::from_str("[1.0, 2.0]").unwrap();
        assert_eq!(bare.into_packet(), vec![1.0, 2.0]);
        let record: DeviceMessage =
            serde_json::from_str(r#"{"timestamp": 5, "packet": [3.0]}"#).unwrap();
        assert_eq!(record.into_packet(), vec![3.0]);
    }
}
