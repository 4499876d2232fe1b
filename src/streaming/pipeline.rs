// Pipeline runtime
//
// The pipeline owns every source of a wired graph. `run` starts each source
// as its own tokio task with a child cancellation token, waits for all of
// them, then closes every source (which closes the downstream graph) once.
// The first failure cancels the remaining sources and is returned after
// teardown.

use crate::streaming::source::{RunLimit, RunSummary, Source};
use crate::streaming::types::{StreamError, StreamResult, StreamState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    StateChanged {
        pipeline_id: String,
        state: StreamState,
    },
    SourceFinished {
        pipeline_id: String,
        summary: RunSummary,
    },
    Error {
        pipeline_id: String,
        source: String,
        error: String,
    },
}

/// Envelope counts per source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub envelopes_per_source: BTreeMap<String, u64>,
    pub total_envelopes: u64,
    pub uptime_seconds: Option<f64>,
}

type EventCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

pub struct Pipeline {
    pub id: String,
    sources: Vec<Source>,
    counters: Vec<(String, Arc<AtomicU64>)>,
    state: Arc<RwLock<StreamState>>,
    is_running: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    start_time: Arc<RwLock<Option<Instant>>>,
    event_callback: Arc<RwLock<Option<EventCallback>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sources: Vec::new(),
            counters: Vec::new(),
            state: Arc::new(RwLock::new(StreamState::Idle)),
            is_running: Arc::new(AtomicBool::new(false)),
            cancel_token: CancellationToken::new(),
            start_time: Arc::new(RwLock::new(None)),
            event_callback: Arc::new(RwLock::new(None)),
        }
    }

    /// Take ownership of a wired source. Its downstream graph is closed by
    /// the pipeline after every source has finished.
    pub fn add_source(&mut self, mut source: Source) -> StreamResult<()> {
        if self.sources.iter().any(|s| s.name() == source.name()) {
            return Err(StreamError::InvalidConfig(format!(
                "duplicate source name '{}'",
                source.name()
            )));
        }
        source.set_cancellation_token(self.cancel_token.child_token());
        source.set_close_downstream_on_exit(false);
        self.counters
            .push((source.name().to_string(), source.produced_counter()));
        self.sources.push(source);
        Ok(())
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(Source::name).collect()
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        *self.event_callback.write() = Some(Box::new(callback));
    }

    fn emit_event(&self, event: PipelineEvent) {
        if let Some(callback) = self.event_callback.read().as_ref() {
            callback(event);
        }
    }

    fn set_state(&self, state: StreamState) {
        *self.state.write() = state.clone();
        self.emit_event(PipelineEvent::StateChanged {
            pipeline_id: self.id.clone(),
            state,
        });
    }

    pub fn get_state(&self) -> StreamState {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Live envelope counts, readable while the pipeline runs
    pub fn get_stats(&self) -> PipelineStats {
        let envelopes_per_source: BTreeMap<String, u64> = self
            .counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load(Ordering::Relaxed)))
            .collect();
        PipelineStats {
            total_envelopes: envelopes_per_source.values().sum(),
            envelopes_per_source,
            uptime_seconds: self
                .start_time
                .read()
                .as_ref()
                .map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Token that stops every source of this pipeline when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Request cooperative cancellation of every source
    pub fn stop(&self) {
        log::info!("Stopping pipeline: {}", self.id);
        self.cancel_token.cancel();
    }

    /// Run every source until `limit`, end of stream, cancellation or the
    /// first failure, then tear the graph down.
    pub async fn run(&mut self, limit: RunLimit) -> StreamResult<Vec<RunSummary>> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }
        if self.sources.is_empty() {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(StreamError::InvalidConfig(
                "pipeline has no sources".to_string(),
            ));
        }

        log::info!(
            "Starting pipeline {} with sources {:?}",
            self.id,
            self.source_names()
        );
        *self.start_time.write() = Some(Instant::now());
        self.set_state(StreamState::Running {
            started_at: chrono::Utc::now().timestamp_millis(),
        });

        let handles: Vec<_> = std::mem::take(&mut self.sources)
            .into_iter()
            .map(|mut source| {
                let pipeline_token = self.cancel_token.clone();
                tokio::spawn(async move {
                    let result = source.start(limit).await;
                    if result.is_err() {
                        // One failed branch ends the whole run
                        pipeline_token.cancel();
                    }
                    (source, result)
                })
            })
            .collect();

        let mut first_error: Option<StreamError> = None;
        let mut summaries = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((source, Ok(summary))) => {
                    self.emit_event(PipelineEvent::SourceFinished {
                        pipeline_id: self.id.clone(),
                        summary: summary.clone(),
                    });
                    summaries.push(summary);
                    self.sources.push(source);
                }
                Ok((source, Err(e))) => {
                    self.emit_event(PipelineEvent::Error {
                        pipeline_id: self.id.clone(),
                        source: source.name().to_string(),
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                    self.sources.push(source);
                }
                Err(e) => {
                    log::error!("Source task failed: {}", e);
                    first_error.get_or_insert(StreamError::Task(e.to_string()));
                }
            }
        }

        for source in &mut self.sources {
            if let Err(e) = source.close().await {
                log::warn!("Failed to close source '{}': {}", source.name(), e);
                first_error.get_or_insert(e);
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        match first_error {
            Some(e) => {
                log::error!("Pipeline {} failed: {}", self.id, e);
                self.set_state(StreamState::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
            None => {
                log::info!("Pipeline {} stopped", self.id);
                self.set_state(StreamState::Stopped);
                Ok(summaries)
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::envelope::ChannelSchema;
    use crate::streaming::source::MemoryAcquisition;

    fn memory_source(name: &str, rows: usize) -> Source {
        let acquisition =
            MemoryAcquisition::new(ChannelSchema::numbered("ch", 1), vec![vec![1.0]; rows]);
        Source::new(name, Box::new(acquisition))
    }

    #[tokio::test]
    async fn test_run_reports_each_source() {
        let mut pipeline = Pipeline::new();
        pipeline.add_source(memory_source("a", 3)).unwrap();
        pipeline.add_source(memory_source("b", 5)).unwrap();

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        pipeline.set_event_callback(move |event| sink.lock().push(event));

        let summaries = pipeline.run(RunLimit::Indefinite).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(pipeline.get_state(), StreamState::Stopped);

        let stats = pipeline.get_stats();
        assert_eq!(stats.envelopes_per_source["a"], 3);
        assert_eq!(stats.total_envelopes, 8);
        assert!(events.lock().len() >= 4);
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_source(memory_source("a", 1)).unwrap();
        assert!(pipeline.add_source(memory_source("a", 1)).is_err());
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_invalid() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.run(RunLimit::Indefinite).await.is_err());
        assert!(!pipeline.is_running());
    }
}
