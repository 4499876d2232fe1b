// Persist envelopes to JSON-lines or CSV files

use crate::streaming::envelope::{ChannelSchema, SampleEnvelope};
use crate::streaming::graph::Consumer;
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// One `{timestamp, data}` record per line
    #[default]
    JsonLines,
    /// `timestamp` column followed by one column per channel
    Csv,
}

impl FileFormat {
    /// Guess from the file extension, defaulting to JSON lines
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => FileFormat::Csv,
            _ => FileFormat::JsonLines,
        }
    }
}

enum Writer {
    Json(BufWriter<File>),
    Csv {
        writer: csv::Writer<File>,
        schema: Option<Arc<ChannelSchema>>,
        needs_header: bool,
    },
}

/// Writes each received envelope as one record.
///
/// The destination is opened on the first `receive`. Unless the sink is in
/// append mode it refuses to touch an existing file, both when constructed
/// and when opening. After a clean `close`, a later `receive` reopens the
/// file this sink created and appends to it.
pub struct FileSink {
    name: String,
    path: PathBuf,
    format: FileFormat,
    append: bool,
    writer: Option<Writer>,
    created: bool,
    records: u64,
}

impl FileSink {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: FileFormat,
        append: bool,
    ) -> StreamResult<Self> {
        let path = path.into();
        if path.exists() && !append {
            return Err(StreamError::DestinationExists(path));
        }

        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(StreamError::InvalidConfig(format!(
                "'{}' does not exist for writing",
                parent.display()
            )));
        }

        Ok(Self {
            name: name.into(),
            path,
            format,
            append,
            writer: None,
            created: false,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written since construction, across reopens
    pub fn records(&self) -> u64 {
        self.records
    }

    async fn open(&mut self) -> StreamResult<Writer> {
        let path = self.path.clone();
        let format = self.format;
        let reopen = self.append || self.created;
        let writer = on_blocking_pool(move || Writer::open(&path, format, reopen)).await??;

        self.created = true;
        log::info!("'{}' writing to {}", self.name, self.path.display());
        Ok(writer)
    }
}

impl Writer {
    fn open(path: &Path, format: FileFormat, reopen: bool) -> StreamResult<Self> {
        let file = if reopen {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => {
                        StreamError::DestinationExists(path.to_path_buf())
                    }
                    _ => StreamError::Io(e),
                })?
        };

        Ok(match format {
            FileFormat::JsonLines => Writer::Json(BufWriter::new(file)),
            FileFormat::Csv => {
                let needs_header = file.metadata()?.len() == 0;
                Writer::Csv {
                    writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
                    schema: None,
                    needs_header,
                }
            }
        })
    }

    fn write(&mut self, envelope: &SampleEnvelope) -> StreamResult<()> {
        match self {
            Writer::Json(writer) => {
                let line = envelope.to_record().to_json_line()?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                Ok(())
            }
            Writer::Csv {
                writer,
                schema,
                needs_header,
            } => write_csv_row(writer, schema, needs_header, envelope),
        }
    }

    fn flush(&mut self) -> StreamResult<()> {
        match self {
            Writer::Json(writer) => writer.flush()?,
            Writer::Csv { writer, .. } => writer.flush()?,
        }
        Ok(())
    }
}

/// File I/O blocks, so it runs on tokio's blocking pool instead of the
/// worker driving the source.
async fn on_blocking_pool<T, F>(task: F) -> StreamResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StreamError::Task(format!("file task failed: {}", e)))
}

fn write_csv_row(
    writer: &mut csv::Writer<File>,
    schema: &mut Option<Arc<ChannelSchema>>,
    needs_header: &mut bool,
    envelope: &SampleEnvelope,
) -> StreamResult<()> {
    match schema {
        Some(known) if known.as_ref() != envelope.schema().as_ref() => {
            return Err(StreamError::SchemaMismatch(format!(
                "CSV columns are {:?}, envelope has {:?}",
                known.names(),
                envelope.schema().names()
            )));
        }
        Some(_) => {}
        None => *schema = Some(Arc::clone(envelope.schema())),
    }

    if *needs_header {
        let mut header = vec!["timestamp".to_string()];
        header.extend(envelope.schema().names().iter().cloned());
        writer.write_record(&header)?;
        *needs_header = false;
    }

    let mut row = vec![envelope.timestamp().to_string()];
    row.extend(envelope.packet().iter().map(f64::to_string));
    writer.write_record(&row)?;
    Ok(())
}

#[async_trait]
impl Consumer for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open().await?,
        };

        let (writer, written) = on_blocking_pool(move || {
            let written = writer.write(&envelope);
            (writer, written)
        })
        .await?;
        self.writer = Some(writer);
        written?;

        self.records += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        on_blocking_pool(move || writer.flush()).await??;

        log::info!(
            "'{}' closed {} ({} records)",
            self.name,
            self.path.display(),
            self.records
        );
        Ok(())
    }
}
