// Sources: the active drivers of a pipeline
//
// A `Source` owns one `Acquisition` back-end and runs the production loop:
// fetch the next envelope, broadcast it to every connected consumer, wait
// `1 / sample_rate`, repeat. New back-ends can be added by:
// 1. Implementing the Acquisition trait
// 2. Adding a variant to SourceConfig
// 3. Registering it in `create_acquisition`
//
// Current implementations:
// - Random: integer noise on numbered channels
// - Simulated: smoothed noise on a device profile's electrodes
// - Memory: replay of in-memory rows
// - JsonReplay / CsvReplay: replay of persisted recordings
// - ChannelDevice: live device fed by an external driver
// - TcpDevice: live device streaming JSON arrays over TCP

mod device;
mod file;
mod memory;
mod random;
mod simulated;

use crate::analysis::DeviceProfile;
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::graph::{Downstream, Producer};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub use device::{ChannelDeviceAcquisition, DeviceEvent, DeviceHandle, TcpDeviceAcquisition};
pub use file::{CsvReplayAcquisition, JsonReplayAcquisition};
pub use memory::MemoryAcquisition;
pub use random::RandomAcquisition;
pub use simulated::SimulatedDeviceAcquisition;

/// Default time a live device may stay silent before the stream counts as interrupted
pub const DEFAULT_INACTIVITY_SECS: f64 = 10.0;

/// Default time allowed for a live device to report that it is connected
pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 10.0;

/// Configuration for the different acquisition back-ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "random")]
    Random {
        #[serde(default = "default_random_rate")]
        sample_rate: f64,
        #[serde(default = "default_random_channels")]
        channel_count: usize,
        #[serde(default)]
        seed: Option<u64>,
    },

    #[serde(rename = "simulated")]
    Simulated {
        #[serde(default)]
        device: DeviceProfile,
        #[serde(default = "default_sample_rate")]
        sample_rate: f64,
        #[serde(default)]
        seed: Option<u64>,
    },

    #[serde(rename = "json_file")]
    JsonFile {
        path: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: f64,
        /// Keep recorded timestamps instead of stamping replayed samples anew
        #[serde(default)]
        preserve_timestamps: bool,
    },

    #[serde(rename = "csv_file")]
    CsvFile {
        path: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: f64,
        #[serde(default)]
        preserve_timestamps: bool,
    },

    #[serde(rename = "tcp_device")]
    TcpDevice {
        host: String,
        port: u16,
        #[serde(default)]
        device: DeviceProfile,
        #[serde(default = "default_sample_rate")]
        sample_rate: f64,
        #[serde(default)]
        inactivity_secs: Option<f64>,
        #[serde(default)]
        connect_timeout_secs: Option<f64>,
    },
}

fn default_sample_rate() -> f64 {
    256.0
}

fn default_random_rate() -> f64 {
    10.0
}

fn default_random_channels() -> usize {
    2
}

/// Factory function to create an Acquisition from configuration
pub fn create_acquisition(config: SourceConfig) -> StreamResult<Box<dyn Acquisition>> {
    match config {
        SourceConfig::Random {
            sample_rate,
            channel_count,
            seed,
        } => Ok(Box::new(RandomAcquisition::new(sample_rate, channel_count, seed)?)),

        SourceConfig::Simulated {
            device,
            sample_rate,
            seed,
        } => Ok(Box::new(SimulatedDeviceAcquisition::new(
            device,
            sample_rate,
            seed,
        )?)),

        SourceConfig::JsonFile {
            path,
            sample_rate,
            preserve_timestamps,
        } => Ok(Box::new(
            JsonReplayAcquisition::new(path, sample_rate)?.preserve_timestamps(preserve_timestamps),
        )),

        SourceConfig::CsvFile {
            path,
            sample_rate,
            preserve_timestamps,
        } => Ok(Box::new(
            CsvReplayAcquisition::new(path, sample_rate)?.preserve_timestamps(preserve_timestamps),
        )),

        SourceConfig::TcpDevice {
            host,
            port,
            device,
            sample_rate,
            inactivity_secs,
            connect_timeout_secs,
        } => Ok(Box::new(TcpDeviceAcquisition::new(
            host,
            port,
            ChannelSchema::new(device.channel_names()),
            sample_rate,
            Duration::from_secs_f64(inactivity_secs.unwrap_or(DEFAULT_INACTIVITY_SECS)),
            Duration::from_secs_f64(connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)),
        )?)),
    }
}

/// Metadata about an acquisition back-end
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub schema: Arc<ChannelSchema>,

    /// Nominal sample rate in Hz
    pub sample_rate: f64,

    /// Whether the production loop must pace itself. Live devices deliver at
    /// their own rate and are not paced.
    pub paced: bool,

    /// Back-end specific properties (file path, address, ...)
    pub properties: HashMap<String, String>,
}

/// Outcome of one `Acquisition::next` call
#[derive(Debug)]
pub enum Acquired {
    Sample(SampleEnvelope),
    EndOfStream,
}

/// Acquisition back-end: produces the next timestamped sample on demand
#[async_trait]
pub trait Acquisition: Send {
    /// Become ready to produce. Fails with `AcquisitionFailure` when the
    /// device or file can never deliver data.
    async fn open(&mut self) -> StreamResult<()>;

    /// Produce the next envelope, `EndOfStream` when exhausted, or
    /// `StreamInterrupted` when a ready device stopped delivering.
    async fn next(&mut self) -> StreamResult<Acquired>;

    /// Release file handles and connections. Idempotent.
    async fn close(&mut self) -> StreamResult<()>;

    fn metadata(&self) -> SourceMetadata;
}

/// How long a source runs
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunLimit {
    /// Until end of stream, failure or cancellation
    #[default]
    Indefinite,
    /// At most this many envelopes
    Samples(u64),
    /// At most this much wall time
    WallTime(Duration),
}

impl RunLimit {
    /// Seconds of data at `sample_rate`, zero meaning indefinite
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        if seconds <= 0.0 {
            RunLimit::Indefinite
        } else {
            RunLimit::Samples((seconds * sample_rate).round() as u64)
        }
    }
}

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    EndOfStream,
    LimitReached,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub envelopes: u64,
    pub elapsed_secs: f64,
    pub outcome: RunOutcome,
}

/// Paced production loop broadcasting to an ordered set of consumers
pub struct Source {
    name: String,
    acquisition: Box<dyn Acquisition>,
    metadata: SourceMetadata,
    downstream: Downstream,
    cancel_token: CancellationToken,
    produced: Arc<AtomicU64>,
    close_downstream_on_exit: bool,
    opened: bool,
    closed: bool,
}

impl Source {
    pub fn new(name: impl Into<String>, acquisition: Box<dyn Acquisition>) -> Self {
        let metadata = acquisition.metadata();
        Self {
            name: name.into(),
            acquisition,
            metadata,
            downstream: Downstream::new(),
            cancel_token: CancellationToken::new(),
            produced: Arc::new(AtomicU64::new(0)),
            close_downstream_on_exit: true,
            opened: false,
            closed: false,
        }
    }

    pub fn from_config(name: impl Into<String>, config: SourceConfig) -> StreamResult<Self> {
        Ok(Self::new(name, create_acquisition(config)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    pub fn sample_rate(&self) -> f64 {
        self.metadata.sample_rate
    }

    pub fn downstream(&self) -> &Downstream {
        &self.downstream
    }

    /// Envelopes produced so far, readable while the source runs
    pub fn produced_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.produced)
    }

    /// Token that stops the production loop at the next safe point
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Replace the cancellation token, e.g. with a child of a pipeline token
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancel_token = token;
    }

    /// When false, a finished run leaves downstream consumers open so an
    /// owner running several sources can close shared consumers once.
    pub fn set_close_downstream_on_exit(&mut self, close: bool) {
        self.close_downstream_on_exit = close;
    }

    /// Request graceful termination at the next safe point
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Run the production loop until `limit`, end of stream, cancellation or
    /// failure. Resources are released on every exit path.
    pub async fn start(&mut self, limit: RunLimit) -> StreamResult<RunSummary> {
        if self.closed {
            return Err(StreamError::InvalidConfig(format!(
                "source '{}' is closed",
                self.name
            )));
        }

        let result = self.run_loop(limit).await;

        let teardown = if self.close_downstream_on_exit {
            self.close().await
        } else {
            self.close_acquisition().await
        };

        match (result, teardown) {
            (Ok(summary), Ok(())) => {
                log::info!(
                    "Source '{}' finished: {} envelopes in {:.2}s ({:?})",
                    self.name,
                    summary.envelopes,
                    summary.elapsed_secs,
                    summary.outcome
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), teardown) => {
                log::error!("Source '{}' failed: {}", self.name, e);
                if let Err(close_err) = teardown {
                    log::warn!("Teardown of '{}' also failed: {}", self.name, close_err);
                }
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, limit: RunLimit) -> StreamResult<RunSummary> {
        if !self.opened {
            self.acquisition.open().await?;
            self.opened = true;
            self.metadata = self.acquisition.metadata();
        }

        let pacing = if self.metadata.paced && self.metadata.sample_rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.metadata.sample_rate))
        } else {
            None
        };

        log::info!(
            "Starting source '{}': {} channels @ {} Hz -> {:?}",
            self.name,
            self.metadata.schema.len(),
            self.metadata.sample_rate,
            self.downstream.names()
        );

        let started = Instant::now();
        let mut envelopes = 0u64;

        let outcome = loop {
            let limit_reached = match limit {
                RunLimit::Indefinite => false,
                RunLimit::Samples(n) => envelopes >= n,
                RunLimit::WallTime(d) => started.elapsed() >= d,
            };
            if limit_reached {
                break RunOutcome::LimitReached;
            }

            let next = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => break RunOutcome::Cancelled,

                next = self.acquisition.next() => next?,
            };

            let envelope = match next {
                Acquired::Sample(envelope) => Arc::new(envelope),
                Acquired::EndOfStream => break RunOutcome::EndOfStream,
            };

            self.downstream.broadcast(envelope).await?;
            envelopes += 1;
            self.produced.fetch_add(1, Ordering::Relaxed);

            if let Some(delay) = pacing {
                tokio::select! {
                    biased;

                    _ = self.cancel_token.cancelled() => break RunOutcome::Cancelled,

                    _ = tokio::time::sleep(delay) => {}
                }
            }
        };

        Ok(RunSummary {
            source: self.name.clone(),
            envelopes,
            elapsed_secs: started.elapsed().as_secs_f64(),
            outcome,
        })
    }

    async fn close_acquisition(&mut self) -> StreamResult<()> {
        if self.opened {
            self.opened = false;
            self.acquisition.close().await?;
        }
        Ok(())
    }

    /// Release the acquisition back-end and close every downstream consumer.
    /// Idempotent.
    pub async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let acquisition = self.close_acquisition().await;
        let downstream = self.downstream.close_all().await;
        acquisition.and(downstream)
    }
}

impl Producer for Source {
    fn output_schema(&self) -> Arc<ChannelSchema> {
        Arc::clone(&self.metadata.schema)
    }

    fn downstream_mut(&mut self) -> &mut Downstream {
        &mut self.downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_limit_from_seconds() {
        assert_eq!(RunLimit::from_seconds(0.0, 256.0), RunLimit::Indefinite);
        assert_eq!(RunLimit::from_seconds(2.0, 10.0), RunLimit::Samples(20));
    }

    #[test]
    fn test_source_config_tagged_json() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type": "simulated", "device": "crown"}"#).unwrap();
        match config {
            SourceConfig::Simulated {
                device,
                sample_rate,
                ..
            } => {
                assert_eq!(device, DeviceProfile::Crown);
                assert_eq!(sample_rate, 256.0);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_start() {
        let acquisition = MemoryAcquisition::new(ChannelSchema::numbered("ch", 1), vec![]);
        let mut source = Source::new("memory", Box::new(acquisition));
        source.close().await.unwrap();
        source.close().await.unwrap();
        assert!(source.start(RunLimit::Indefinite).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start_produces_nothing() {
        let rows = vec![vec![1.0]; 10];
        let acquisition = MemoryAcquisition::new(ChannelSchema::numbered("ch", 1), rows);
        let mut source = Source::new("memory", Box::new(acquisition));
        source.stop();
        let summary = source.start(RunLimit::Indefinite).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.envelopes, 0);
    }
}
