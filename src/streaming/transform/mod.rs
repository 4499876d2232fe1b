// Transforms: nodes that both consume and produce envelopes
//
// A transform receives envelopes from its producers, and synchronously
// broadcasts any derived envelope to its own downstream set before `receive`
// returns. Closing a transform closes its downstream set.

mod analysis;
mod downsample;
mod scale;

use crate::analysis::{BandPowerAnalyzer, DeviceProfile};
use crate::streaming::envelope::ChannelSchema;
use crate::streaming::graph::{Consumer, Producer};
use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use analysis::{AnalysisFailurePolicy, PeriodicAnalysisTransform, DEFAULT_WINDOW_SECONDS};
pub use downsample::DownsampleTransform;
pub use scale::ScaleTransform;

/// A node that is both a consumer and a producer
pub trait Transform: Consumer + Producer {}

impl<T: Consumer + Producer> Transform for T {}

/// Configuration for the built-in transforms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformConfig {
    #[serde(rename = "scale")]
    Scale { factor: f64 },

    /// Either a fixed `window`, or `input_rate` and `target_rate`
    #[serde(rename = "downsample")]
    Downsample {
        #[serde(default)]
        window: Option<usize>,
        #[serde(default)]
        input_rate: Option<f64>,
        #[serde(default)]
        target_rate: Option<f64>,
    },

    #[serde(rename = "analysis")]
    Analysis {
        #[serde(default = "default_analysis_rate")]
        sample_rate: usize,
        #[serde(default = "default_window_seconds")]
        window_seconds: usize,
        #[serde(default)]
        device: DeviceProfile,
        #[serde(default)]
        on_failure: AnalysisFailurePolicy,
    },
}

fn default_analysis_rate() -> usize {
    256
}

fn default_window_seconds() -> usize {
    DEFAULT_WINDOW_SECONDS
}

/// Factory function to create a transform fed with `input` channels
pub fn create_transform(
    name: &str,
    config: TransformConfig,
    input: Arc<ChannelSchema>,
) -> StreamResult<Box<dyn Transform>> {
    match config {
        TransformConfig::Scale { factor } => Ok(Box::new(ScaleTransform::new(name, factor, input)?)),

        TransformConfig::Downsample {
            window: Some(window),
            ..
        } => Ok(Box::new(DownsampleTransform::new(name, window, input)?)),

        TransformConfig::Downsample {
            window: None,
            input_rate: Some(input_rate),
            target_rate: Some(target_rate),
        } => Ok(Box::new(DownsampleTransform::from_rates(
            name,
            input_rate,
            target_rate,
            input,
        )?)),

        TransformConfig::Downsample { .. } => Err(StreamError::InvalidConfig(format!(
            "downsample '{}' needs either window or input_rate and target_rate",
            name
        ))),

        TransformConfig::Analysis {
            sample_rate,
            window_seconds,
            device,
            on_failure,
        } => Ok(Box::new(
            PeriodicAnalysisTransform::new(
                name,
                Arc::new(BandPowerAnalyzer),
                device,
                sample_rate,
                window_seconds,
            )?
            .with_failure_policy(on_failure),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_config_needs_window_or_rates() {
        let config: TransformConfig =
            serde_json::from_str(r#"{"type": "downsample", "input_rate": 256}"#).unwrap();
        let input = ChannelSchema::numbered("ch", 2).into_shared();
        assert!(create_transform("d", config, input).is_err());
    }

    #[test]
    fn test_analysis_output_schema_uses_snake_case_metrics() {
        let config: TransformConfig = serde_json::from_str(r#"{"type": "analysis"}"#).unwrap();
        let input = ChannelSchema::new(DeviceProfile::Muse.channel_names()).into_shared();
        let transform = create_transform("a", config, input).unwrap();
        let schema = transform.output_schema();
        assert_eq!(schema.names()[0], "delta_power");
        assert!(schema.index_of("ratio_delta_beta").is_some());
    }
}
