// Simulated headset: smoothed random voltages on a device profile's electrodes

use super::{Acquired, Acquisition, SourceMetadata};
use crate::analysis::DeviceProfile;
use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::types::{StreamError, StreamResult};
use crate::streaming::window_buffer::{WindowBuffer, MAX_WINDOW_ROWS};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

const VOLTAGE_RANGE: std::ops::Range<f64> = 200.0..1200.0;

/// Each packet is the mean of the last second of raw random readings
pub struct SimulatedDeviceAcquisition {
    profile: DeviceProfile,
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    rng: StdRng,
    history: WindowBuffer,
}

impl SimulatedDeviceAcquisition {
    pub fn new(profile: DeviceProfile, sample_rate: f64, seed: Option<u64>) -> StreamResult<Self> {
        if !(sample_rate >= 1.0) || sample_rate.round() > MAX_WINDOW_ROWS as f64 {
            return Err(StreamError::InvalidConfig(format!(
                "simulated device needs a sample rate between 1 and {} Hz, got {}",
                MAX_WINDOW_ROWS, sample_rate
            )));
        }
        if profile.channel_count() == 0 {
            return Err(StreamError::InvalidConfig(
                "simulated device needs at least one channel".to_string(),
            ));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            schema: ChannelSchema::new(profile.channel_names()).into_shared(),
            profile,
            sample_rate,
            rng,
            history: WindowBuffer::new(sample_rate.round() as usize)?,
        })
    }

    fn raw_reading(&mut self) -> Vec<f64> {
        (0..self.schema.len())
            .map(|_| self.rng.random_range(VOLTAGE_RANGE))
            .collect()
    }
}

#[async_trait]
impl Acquisition for SimulatedDeviceAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        // Start from a full second of history so the first packet is already smooth
        while !self.history.is_full() {
            let reading = self.raw_reading();
            self.history.push(reading);
        }
        log::debug!(
            "Simulated {} device ready with {} channels",
            self.profile.name(),
            self.schema.len()
        );
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        let reading = self.raw_reading();
        self.history.push(reading);
        let packet = self.history.mean_row()?;
        Ok(Acquired::Sample(SampleEnvelope::new(
            Arc::clone(&self.schema),
            packet,
        )?))
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.history.reset();
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        let mut properties = HashMap::new();
        properties.insert("device".to_string(), self.profile.name());
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

    #[test]
    fn test_unusable_sample_rates_rejected() {
        for rate in [0.5, f64::NAN, f64::INFINITY, 1e18] {
            let result = SimulatedDeviceAcquisition::new(DeviceProfile::Muse, rate, Some(1));
            assert!(
                matches!(result, Err(StreamError::InvalidConfig(_))),
                "rate {} should be rejected",
                rate
            );
        }
    }

    #[tokio::test]
    async fn test_crown_channels_and_smoothed_range() {
        let mut acquisition =
            SimulatedDeviceAcquisition::new(DeviceProfile::Crown, 32.0, Some(3)).unwrap();
        acquisition.open().await.unwrap();

        let Acquired::Sample(envelope) = acquisition.next().await.unwrap() else {
            panic!("simulated device never ends");
        };
        assert_eq!(envelope.schema().names()[0], "CP3");
        assert_eq!(envelope.packet().len(), 8);
        assert!(envelope
            .packet()
            .iter()
            .all(|v| (200.0..1200.0).contains(v)));
    }
}
