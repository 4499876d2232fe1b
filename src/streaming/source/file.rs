// File-backed replay of persisted recordings
//
// Both readers take their channel schema from the file itself: the JSON reader
// from the first record's `data` keys, the CSV reader from the header row (first
// column is the timestamp). Replay is paced at the configured sample rate and
// ends without error when the file is exhausted.

use super::{Acquired, Acquisition, SourceMetadata};
use crate::streaming::envelope::{now_millis, ChannelSchema, PersistedRecord, SampleEnvelope};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

fn check_readable(path: &Path) -> StreamResult<()> {
    if !path.is_file() {
        return Err(StreamError::AcquisitionFailure(format!(
            "Could not find: {}",
            path.display()
        )));
    }
    Ok(())
}

/// First non-blank line of a file, read synchronously at construction time
fn first_line(path: &Path) -> StreamResult<Option<String>> {
    let file = std::fs::File::open(path)
        .map_err(|e| StreamError::AcquisitionFailure(format!("{}: {}", path.display(), e)))?;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

async fn open_lines(path: &Path) -> StreamResult<Lines<BufReader<File>>> {
    let file = File::open(path)
        .await
        .map_err(|e| StreamError::AcquisitionFailure(format!("{}: {}", path.display(), e)))?;
    Ok(BufReader::new(file).lines())
}

/// Next non-blank line, or None at end of file
async fn next_line(lines: &mut Lines<BufReader<File>>) -> StreamResult<Option<String>> {
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn file_properties(path: &Path, format: &str) -> HashMap<String, String> {
    [
        ("file_path".to_string(), path.display().to_string()),
        ("format".to_string(), format.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Replays a JSON-lines recording of `{timestamp, data}` records
pub struct JsonReplayAcquisition {
    path: PathBuf,
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    preserve_timestamps: bool,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
}

impl JsonReplayAcquisition {
    pub fn new(path: impl Into<PathBuf>, sample_rate: f64) -> StreamResult<Self> {
        let path = path.into();
        check_readable(&path)?;

        let names = match first_line(&path)? {
            Some(line) => PersistedRecord::from_json_line(&line)?.channel_names(),
            None => Vec::new(),
        };

        Ok(Self {
            path,
            schema: ChannelSchema::new(names).into_shared(),
            sample_rate,
            preserve_timestamps: false,
            lines: None,
            line_number: 0,
        })
    }

    /// Keep the recorded timestamps instead of stamping each replayed envelope
    pub fn preserve_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }
}

#[async_trait]
impl Acquisition for JsonReplayAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        if self.lines.is_none() {
            self.lines = Some(open_lines(&self.path).await?);
            self.line_number = 0;
            log::info!(
                "Replaying {} ({} channels)",
                self.path.display(),
                self.schema.len()
            );
        }
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(StreamError::InvalidConfig(
                "JSON replay read before open".to_string(),
            ));
        };

        let Some(line) = next_line(lines).await? else {
            log::debug!("Reached end of {}", self.path.display());
            return Ok(Acquired::EndOfStream);
        };
        self.line_number += 1;

        let record = PersistedRecord::from_json_line(&line).map_err(|e| {
            StreamError::Parse(format!("{} line {}: {}", self.path.display(), self.line_number, e))
        })?;
        let mut envelope = record.to_envelope(&self.schema)?;
        if !self.preserve_timestamps {
            envelope = SampleEnvelope::new(Arc::clone(&self.schema), envelope.packet().to_vec())?;
        }
        Ok(Acquired::Sample(envelope))
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.lines = None;
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: true,
            properties: file_properties(&self.path, "json"),
        }
    }
}

/// Replays a CSV recording with a `timestamp,<channel>...` header
pub struct CsvReplayAcquisition {
    path: PathBuf,
    schema: Arc<ChannelSchema>,
    sample_rate: f64,
    preserve_timestamps: bool,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
}

fn parse_csv_line(line: &str) -> StreamResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(|field| field.trim().to_string()).collect()),
        None => Ok(Vec::new()),
    }
}

impl CsvReplayAcquisition {
    pub fn new(path: impl Into<PathBuf>, sample_rate: f64) -> StreamResult<Self> {
        let path = path.into();
        check_readable(&path)?;

        let header = first_line(&path)?.ok_or_else(|| {
            StreamError::Parse(format!("{} has no header row", path.display()))
        })?;
        let names: Vec<String> = parse_csv_line(&header)?.into_iter().skip(1).collect();

        Ok(Self {
            path,
            schema: ChannelSchema::new(names).into_shared(),
            sample_rate,
            preserve_timestamps: false,
            lines: None,
            line_number: 0,
        })
    }

    pub fn preserve_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    fn parse_row(&self, line: &str) -> StreamResult<(i64, Vec<f64>)> {
        let fields = parse_csv_line(line)?;
        let bad_value = |field: &str| {
            StreamError::Parse(format!(
                "{} line {}: '{}' is not a number",
                self.path.display(),
                self.line_number,
                field
            ))
        };

        let (timestamp, values) = fields
            .split_first()
            .ok_or_else(|| StreamError::Parse(format!("empty row at line {}", self.line_number)))?;

        let timestamp = if self.preserve_timestamps {
            timestamp
                .parse::<f64>()
                .map_err(|_| bad_value(timestamp))?
                .round() as i64
        } else {
            now_millis()
        };

        let packet = values
            .iter()
            .map(|field| field.parse::<f64>().map_err(|_| bad_value(field)))
            .collect::<StreamResult<Vec<f64>>>()?;

        Ok((timestamp, packet))
    }
}

#[async_trait]
impl Acquisition for CsvReplayAcquisition {
    async fn open(&mut self) -> StreamResult<()> {
        if self.lines.is_none() {
            let mut lines = open_lines(&self.path).await?;
            // Header was already read at construction
            next_line(&mut lines).await?;
            self.lines = Some(lines);
            self.line_number = 1;
            log::info!("starting csv file reader: {}", self.path.display());
        }
        Ok(())
    }

    async fn next(&mut self) -> StreamResult<Acquired> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(StreamError::InvalidConfig(
                "CSV replay read before open".to_string(),
            ));
        };

        let Some(line) = next_line(lines).await? else {
            log::debug!("done with all rows: {}", self.line_number - 1);
            return Ok(Acquired::EndOfStream);
        };
        self.line_number += 1;

        let (timestamp, packet) = self.parse_row(&line)?;
        Ok(Acquired::Sample(SampleEnvelope::with_timestamp(
            timestamp,
            Arc::clone(&self.schema),
            packet,
        )?))
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.lines = None;
        Ok(())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            schema: Arc::clone(&self.schema),
            sample_rate: self.sample_rate,
            paced: true,
            properties: file_properties(&self.path, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn drain(acquisition: &mut dyn Acquisition) -> Vec<SampleEnvelope> {
        acquisition.open().await.unwrap();
        let mut envelopes = Vec::new();
        while let Acquired::Sample(envelope) = acquisition.next().await.unwrap() {
            envelopes.push(envelope);
        }
        acquisition.close().await.unwrap();
        envelopes
    }

    #[test]
    fn test_missing_file_is_acquisition_failure() {
        let result = JsonReplayAcquisition::new("/nonexistent/recording.json", 256.0);
        assert!(matches!(result, Err(StreamError::AcquisitionFailure(_))));
    }

    #[tokio::test]
    async fn test_json_replay_preserves_timestamps_on_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"timestamp":10,"data":{{"TP9":1.0,"AF7":2.0,"packet":[1.0,2.0]}}}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"timestamp":20,"data":{{"TP9":3.0,"AF7":4.0,"packet":[3.0,4.0]}}}}"#).unwrap();

        let mut acquisition = JsonReplayAcquisition::new(file.path(), 256.0)
            .unwrap()
            .preserve_timestamps(true);
        assert_eq!(acquisition.metadata().schema.names(), &["TP9", "AF7"]);

        let envelopes = drain(&mut acquisition).await;
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].timestamp(), 10);
        assert_eq!(envelopes[1].packet(), &[3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_csv_replay_reads_header_and_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,TP9,AF7").unwrap();
        writeln!(file, "100,1.5,-2").unwrap();
        writeln!(file, "200,3,4").unwrap();

        let mut acquisition = CsvReplayAcquisition::new(file.path(), 256.0)
            .unwrap()
            .preserve_timestamps(true);
        let envelopes = drain(&mut acquisition).await;

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].timestamp(), 100);
        assert_eq!(envelopes[0].channel("AF7"), Some(-2.0));
        assert_eq!(envelopes[1].packet(), &[3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_csv_replay_rejects_non_numeric_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,TP9").unwrap();
        writeln!(file, "100,abc").unwrap();

        let mut acquisition = CsvReplayAcquisition::new(file.path(), 256.0).unwrap();
        acquisition.open().await.unwrap();
        assert!(matches!(
            acquisition.next().await,
            Err(StreamError::Parse(_))
        ));
    }
}
