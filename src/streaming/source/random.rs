// Random integer noise on numbered channels

use super::{Acquired, Acquisition, SourceMetadata};
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Channels are named `channel0..channelN-1`
pub const RANDOM_CHANNEL_PREFIX: &str = "channel";

const VALUE_RANGE: std::ops::RangeInclusive<i32> = -10..=10;

/// Unbounded source of uniformly distributed integers in [-10, 10]
pub struct RandomAcquisition {
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    seed: Option<u64>,
    rng: StdRng,
}

impl RandomAcquisition {
    pub fn new(sample_rate: f64, channel_count: usize, seed: Option<u64>) -> StreamResult<Self> {
        if !(sample_rate > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if channel_count == 0 {
            return Err(StreamError::InvalidConfig(
                "random source needs at least one channel".to_string(),
            ));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            schema: ChannelSchema::numbered(RANDOM_CHANNEL_PREFIX, channel_count).into_shared(),
            sample_rate,
            seed,
            rng,
        })
    }
}

#[async_trait]
impl Acquisition for RandomAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        let packet = (0..self.schema.len())
            .map(|_| self.rng.random_range(VALUE_RANGE) as f64)
            .collect();
        Ok(Acquired::Sample(SampleEnvelope::new(
            Arc::clone(&self.schema),
            packet,
        )?))
    }

    async fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        let mut properties = HashMap::new();
        if let Some(seed) = self.seed {
            properties.insert("seed".to_string(), seed.to_string());
        }
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: true,
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_stay_in_range() {
        let mut acquisition = RandomAcquisition::new(10.0, 3, Some(7)).unwrap();
        for _ in 0..200 {
            match acquisition.next().await.unwrap() {
                Acquired::Sample(envelope) => {
                    assert_eq!(envelope.packet().len(), 3);
                    for &value in envelope.packet() {
                        assert!((-10.0..=10.0).contains(&value));
                        assert_eq!(value.fract(), 0.0);
                    }
                }
                Acquired::EndOfStream => panic!("random source never ends"),
            }
        }
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(RandomAcquisition::new(0.0, 2, None).is_err());
        assert!(RandomAcquisition::new(10.0, 0, None).is_err());
    }
}
