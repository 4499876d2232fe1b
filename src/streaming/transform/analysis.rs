// Periodic windowed analysis
//
// Two rolling buffers of raw packet rows: a short one that fills every
// quarter second and a long one holding the analysis window. Each time the
// short buffer has collected a full window of new rows, those rows slide into
// the long buffer and, once the long buffer is full, the analyzer runs on it.

use crate::analysis::{normalize_metric_name, Analyzer, DeviceProfile};
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::graph::{Consumer, Downstream, Producer};
use crate::streaming::types::{StreamError, StreamResult};
use crate::streaming::window_buffer::WindowBuffer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Default analysis window length in seconds
pub const DEFAULT_WINDOW_SECONDS: usize = 5;

/// What to do when the analyzer fails on one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFailurePolicy {
    /// Fail the receive call, which ends the source's run
    #[default]
    Propagate,
    /// Log the failure, emit nothing for this window and keep going
    SkipWindow,
}

pub struct PeriodicAnalysisTransform {
    name: String,
    analyzer: Arc<dyn Analyzer>,
    profile: DeviceProfile,
    sample_rate: f64,
    policy: AnalysisFailurePolicy,
    short: WindowBuffer,
    long: WindowBuffer,
    schema: Arc<ChannelSchema>,
    downstream: Downstream,
    analyses: u64,
    skipped: u64,
    total_analysis_secs: f64,
    closed: bool,
}

impl PeriodicAnalysisTransform {
    pub fn new(
        name: impl Into<String>,
        analyzer: Arc<dyn Analyzer>,
        profile: DeviceProfile,
        sample_rate: usize,
        window_seconds: usize,
    ) -> StreamResult<Self> {
        if sample_rate < 4 {
            return Err(StreamError::InvalidConfig(format!(
                "analysis needs a sample rate of at least 4 Hz, got {}",
                sample_rate
            )));
        }
        if window_seconds == 0 {
            return Err(StreamError::InvalidConfig(
                "analysis window must be at least one second".to_string(),
            ));
        }

        let long_rows = sample_rate.checked_mul(window_seconds).ok_or_else(|| {
            StreamError::InvalidConfig(format!(
                "analysis window of {} s at {} Hz is too long",
                window_seconds, sample_rate
            ))
        })?;

        let schema = ChannelSchema::new(
            analyzer
                .metric_names()
                .iter()
                .map(|metric| normalize_metric_name(metric)),
        )
        .into_shared();

        Ok(Self {
            name: name.into(),
            analyzer,
            profile,
            sample_rate: sample_rate as f64,
            policy: AnalysisFailurePolicy::default(),
            short: WindowBuffer::new(sample_rate / 4)?,
            long: WindowBuffer::new(long_rows)?,
            schema,
            downstream: Downstream::new(),
            analyses: 0,
            skipped: 0,
            total_analysis_secs: 0.0,
            closed: false,
        })
    }

    pub fn with_failure_policy(mut self, policy: AnalysisFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rows per analysis step
    pub fn short_capacity(&self) -> usize {
        self.short.capacity()
    }

    /// Rows per analysis window
    pub fn long_capacity(&self) -> usize {
        self.long.capacity()
    }

    /// Windows analyzed successfully
    pub fn analyses(&self) -> u64 {
        self.analyses
    }

    /// Windows skipped under `AnalysisFailurePolicy::SkipWindow`
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    async fn run_analysis(&self) -> StreamResult<Vec<(String, f64)>> {
        let analyzer = Arc::clone(&self.analyzer);
        let profile = self.profile.clone();
        let sample_rate = self.sample_rate;
        let window = self.long.to_vec();

        tokio::task::spawn_blocking(move || analyzer.analyze(&window, sample_rate, &profile))
            .await
            .map_err(|e| StreamError::Task(format!("analysis task failed: {}", e)))?
    }

    /// Turn an analyzer result into an envelope in output-schema order
    fn to_envelope(&self, metrics: Vec<(String, f64)>) -> StreamResult<SampleEnvelope> {
        if metrics.len() != self.schema.len() {
            return Err(StreamError::Analysis(format!(
                "analyzer returned {} metrics, expected {}",
                metrics.len(),
                self.schema.len()
            )));
        }

        let mut packet = vec![f64::NAN; self.schema.len()];
        for (metric, value) in metrics {
            let key = normalize_metric_name(&metric);
            let index = self.schema.index_of(&key).ok_or_else(|| {
                StreamError::Analysis(format!("analyzer returned unknown metric '{}'", metric))
            })?;
            packet[index] = value;
        }
        SampleEnvelope::new(Arc::clone(&self.schema), packet)
    }

    async fn analysis_cycle(&mut self) -> StreamResult<()> {
        self.long.extend(self.short.rows().cloned().collect::<Vec<_>>());

        if self.long.is_full() {
            let started = Instant::now();
            match self.run_analysis().await.and_then(|m| self.to_envelope(m)) {
                Ok(envelope) => {
                    self.analyses += 1;
                    self.total_analysis_secs += started.elapsed().as_secs_f64();
                    log::debug!(
                        "'{}' analysis #{} (mean {:.1} ms)",
                        self.name,
                        self.analyses,
                        1000.0 * self.total_analysis_secs / self.analyses as f64
                    );
                    self.downstream.broadcast(Arc::new(envelope)).await?;
                }
                Err(e) if self.policy == AnalysisFailurePolicy::SkipWindow => {
                    self.skipped += 1;
                    log::warn!("'{}' skipped an analysis window: {}", self.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        // The short buffer keeps all but one row of the window it just
        // handed over. Cycles trigger on a full window of fresh rows, so those
        // kept rows are always evicted before the next cycle reads the buffer
        // and this has no effect on output. Triggering on `is_full()` instead
        // would run a cycle per row and break the quarter-second cadence.
        let keep = self.short.capacity() - 1;
        self.short.retain_last(keep);
        Ok(())
    }
}

#[async_trait]
impl Consumer for PeriodicAnalysisTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, schema: &ChannelSchema) -> StreamResult<()> {
        let needed = self.profile.channel_count();
        if schema.len() < needed {
            return Err(StreamError::SchemaMismatch(format!(
                "'{}' analyzes {} {} channels, producer has {}",
                self.name,
                needed,
                self.profile.name(),
                schema.len()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        self.short.push(envelope.packet().to_vec());
        if self.short.is_ready() {
            self.analysis_cycle().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::info!(
            "'{}' closed after {} analyses ({} skipped)",
            self.name,
            self.analyses,
            self.skipped
        );
        self.downstream.close_all().await
    }
}

impl Producer for PeriodicAnalysisTransform {
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

    /// Mean of the first channel over the window
    struct MeanAnalyzer;

    impl Analyzer for MeanAnalyzer {
        fn metric_names(&self) -> Vec<String> {
            vec!["Window Mean".to_string(), "Window Rows".to_string()]
        }

        fn analyze(
            &self,
            window: &[Vec<f64>],
            _sample_rate: f64,
            _profile: &DeviceProfile,
        ) -> StreamResult<Vec<(String, f64)>> {
            if window.iter().any(|row| row[0] < 0.0) {
                return Err(StreamError::Analysis("negative input".to_string()));
            }
            let mean = window.iter().map(|row| row[0]).sum::<f64>() / window.len() as f64;
            Ok(vec![
                ("Window Mean".to_string(), mean),
                ("Window Rows".to_string(), window.len() as f64),
            ])
        }
    }

    fn transform() -> PeriodicAnalysisTransform {
        PeriodicAnalysisTransform::new("analysis", Arc::new(MeanAnalyzer), DeviceProfile::Generic(1), 8, 1)
            .unwrap()
    }

    fn row(value: f64) -> Arc<SampleEnvelope> {
        let schema = ChannelSchema::numbered("ch", 1).into_shared();
        Arc::new(SampleEnvelope::new(schema, vec![value]).unwrap())
    }

    #[test]
    fn test_capacities_and_schema() {
        let transform = transform();
        assert_eq!(transform.short_capacity(), 2);
        assert_eq!(transform.long_capacity(), 8);
        assert_eq!(transform.output_schema().names(), &["window_mean", "window_rows"]);
    }

    #[tokio::test]
    async fn test_analysis_failure_propagates_by_default() {
        let mut transform = transform();
        for _ in 0..6 {
            transform.receive(row(1.0)).await.unwrap();
        }
        transform.receive(row(-1.0)).await.unwrap();
        let err = transform.receive(row(1.0)).await.unwrap_err();
        assert!(matches!(err, StreamError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_skip_window_policy_keeps_running() {
        let mut transform = transform().with_failure_policy(AnalysisFailurePolicy::SkipWindow);
        for i in 0..12 {
            let value = if i == 7 { -1.0 } else { 1.0 };
            transform.receive(row(value)).await.unwrap();
        }
        assert!(transform.skipped() >= 1);
        assert_eq!(transform.analyses() + transform.skipped(), 3);
    }

    #[test]
    fn test_overflowing_window_rejected() {
        let result = PeriodicAnalysisTransform::new(
            "a",
            Arc::new(MeanAnalyzer),
            DeviceProfile::Muse,
            256,
            usize::MAX,
        );
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));

        let result = PeriodicAnalysisTransform::new(
            "a",
            Arc::new(MeanAnalyzer),
            DeviceProfile::Muse,
            256,
            1_000_000,
        );
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
    }

    #[test]
    fn test_low_sample_rate_rejected() {
        let result =
            PeriodicAnalysisTransform::new("a", Arc::new(MeanAnalyzer), DeviceProfile::Muse, 3, 5);
        assert!(result.is_err());
    }
}
