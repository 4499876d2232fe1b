use crate::streaming::envelope::SampleEnvelope;
use crate::streaming::graph::Consumer;
use crate::streaming::types::StreamResult;
use async_trait::async_trait;
use std::io::{Stdout, Write};
use std::sync::Arc;

/// Prints `timestamp [packet]` per envelope
pub struct ConsoleSink<W: Write + Send = Stdout> {
    name: String,
    out: W,
    printed: u64,
}

impl ConsoleSink<Stdout> {
    pub fn stdout(name: impl Into<String>) -> Self {
        Self::new(name, std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(name: impl Into<String>, out: W) -> Self {
        Self {
            name: name.into(),
            out,
            printed: 0,
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.printed
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> Consumer for ConsoleSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        writeln!(self.out, "{} {:?}", envelope.timestamp(), envelope.packet())?;
        self.printed += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.out.flush()?;
        Ok(())
    }
}
