// Timestamped multi-channel sample record
//
// An envelope is immutable once built. It is shared by `Arc` across every
// consumer of a broadcast, so transforms always build new envelopes.

use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ordered channel names for one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSchema {
    names: Vec<String>,
}

impl ChannelSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// `prefix0`, `prefix1`, ... `prefix{count-1}`
    pub fn numbered(prefix: &str, count: usize) -> Self {
        Self::new((0..count).map(|i| format!("{}{}", prefix, i)))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn into_shared(self) -> Arc<ChannelSchema> {
        Arc::new(self)
    }
}

/// One timestamped sample: a packet vector plus the stage's channel names.
///
/// The channel mapping is the schema zipped with `packet`, so both views
/// always agree and always have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEnvelope {
    timestamp: i64,
    schema: Arc<ChannelSchema>,
    packet: Vec<f64>,
}

impl SampleEnvelope {
    /// Build an envelope stamped with the current wall-clock time
    pub fn new(schema: Arc<ChannelSchema>, packet: Vec<f64>) -> StreamResult<Self> {
        Self::with_timestamp(now_millis(), schema, packet)
    }

    pub fn with_timestamp(
        timestamp: i64,
        schema: Arc<ChannelSchema>,
        packet: Vec<f64>,
    ) -> StreamResult<Self> {
        if packet.len() != schema.len() {
            return Err(StreamError::SchemaMismatch(format!(
                "packet has {} values but schema has {} channels",
                packet.len(),
                schema.len()
            )));
        }
        Ok(Self {
            timestamp,
            schema,
            packet,
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn schema(&self) -> &Arc<ChannelSchema> {
        &self.schema
    }

    pub fn packet(&self) -> &[f64] {
        &self.packet
    }

    /// Channel name/value pairs in schema order
    pub fn channels(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.packet.iter().copied())
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.packet[i])
    }

    pub fn to_record(&self) -> PersistedRecord {
        PersistedRecord::from(self)
    }
}

/// Persisted shape of an envelope: `{timestamp, data}` where `data` holds
/// every channel value followed by the `packet` vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub timestamp: i64,
    pub data: Map<String, Value>,
}

const PACKET_KEY: &str = "packet";

impl From<&SampleEnvelope> for PersistedRecord {
    fn from(envelope: &SampleEnvelope) -> Self {
        let mut data = Map::new();
        for (name, value) in envelope.channels() {
            data.insert(name.to_string(), Value::from(value));
        }
        data.insert(
            PACKET_KEY.to_string(),
            Value::Array(envelope.packet.iter().map(|&v| Value::from(v)).collect()),
        );
        Self {
            timestamp: envelope.timestamp,
            data,
        }
    }
}

impl PersistedRecord {
    pub fn to_json_line(&self) -> StreamResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_line(line: &str) -> StreamResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Channel names in record order, excluding the packet vector
    pub fn channel_names(&self) -> Vec<String> {
        self.data
            .keys()
            .filter(|k| k.as_str() != PACKET_KEY)
            .cloned()
            .collect()
    }

    /// Rebuild an envelope against a known schema, keeping the persisted
    /// timestamp. The packet vector wins over per-channel values when present.
    pub fn to_envelope(&self, schema: &Arc<ChannelSchema>) -> StreamResult<SampleEnvelope> {
        let packet = match self.data.get(PACKET_KEY) {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        StreamError::Parse(format!("non-numeric packet value: {}", v))
                    })
                })
                .collect::<StreamResult<Vec<f64>>>()?,
            Some(other) => {
                return Err(StreamError::Parse(format!(
                    "packet must be an array, got {}",
                    other
                )))
            }
            None => schema
                .names()
                .iter()
                .map(|name| {
                    self.data
                        .get(name)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| StreamError::Parse(format!("missing channel '{}'", name)))
                })
                .collect::<StreamResult<Vec<f64>>>()?,
        };
        SampleEnvelope::with_timestamp(self.timestamp, Arc::clone(schema), packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<ChannelSchema> {
        ChannelSchema::new(["TP9", "AF7"]).into_shared()
    }

    #[test]
    fn test_packet_length_must_match_schema() {
        let result = SampleEnvelope::new(schema(), vec![1.0]);
        assert!(matches!(result, Err(StreamError::SchemaMismatch(_))));
    }

    #[test]
    fn test_channels_follow_schema_order() {
        let envelope = SampleEnvelope::with_timestamp(42, schema(), vec![1.5, -2.0]).unwrap();
        let channels: Vec<_> = envelope.channels().collect();
        assert_eq!(channels, vec![("TP9", 1.5), ("AF7", -2.0)]);
        assert_eq!(envelope.channel("AF7"), Some(-2.0));
        assert_eq!(envelope.channel("TP10"), None);
    }

    #[test]
    fn test_record_json_shape() {
        let envelope = SampleEnvelope::with_timestamp(1000, schema(), vec![1.0, 2.0]).unwrap();
        let line = envelope.to_record().to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"timestamp":1000,"data":{"TP9":1.0,"AF7":2.0,"packet":[1.0,2.0]}}"#
        );
    }

    #[test]
    fn test_record_without_packet_uses_channel_values() {
        let record =
            PersistedRecord::from_json_line(r#"{"timestamp":5,"data":{"TP9":3,"AF7":4}}"#).unwrap();
        assert_eq!(record.channel_names(), vec!["TP9", "AF7"]);

        let envelope = record.to_envelope(&schema()).unwrap();
        assert_eq!(envelope.timestamp(), 5);
        assert_eq!(envelope.packet(), &[3.0, 4.0]);
    }
}
