// Sinks: terminal consumers of envelopes
//
// New sinks can be added by:
// 1. Implementing the Consumer trait
// 2. Adding a variant to SinkConfig
// 3. Registering it in `create_sink`

mod console;
mod file;
mod http;
mod udp;

use crate::streaming::graph::ConsumerHandle;
use crate::streaming::types::StreamResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use console::ConsoleSink;
pub use file::{FileFormat, FileSink};
pub use http::HttpPostSink;
pub use udp::{ForwardingPool, UdpForwardSink, DEFAULT_FORWARD_ADDRESS, DEFAULT_FORWARD_PORT};

/// Configuration for the built-in sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SinkConfig {
    /// Format defaults to the file extension (`.csv` or JSON lines)
    #[serde(rename = "file")]
    File {
        path: String,
        #[serde(default)]
        format: Option<FileFormat>,
        #[serde(default)]
        append: bool,
    },

    #[serde(rename = "console")]
    Console,

    #[serde(rename = "udp")]
    Udp {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_address")]
        address: String,
        #[serde(default = "default_multi_channel")]
        multi_channel: bool,
    },

    #[serde(rename = "http")]
    Http { endpoint: String },
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_FORWARD_PORT
}

fn default_address() -> String {
    DEFAULT_FORWARD_ADDRESS.to_string()
}

fn default_multi_channel() -> bool {
    true
}

/// Factory function to create a sink. Forwarding sinks share `pool`.
pub async fn create_sink(
    name: &str,
    config: SinkConfig,
    pool: &Arc<ForwardingPool>,
) -> StreamResult<ConsumerHandle> {
    let handle = match config {
        SinkConfig::File {
            path,
            format,
            append,
        } => {
            let path = PathBuf::from(path);
            let format = format.unwrap_or_else(|| FileFormat::from_path(&path));
            ConsumerHandle::new(FileSink::new(name, path, format, append)?)
        }

        SinkConfig::Console => ConsumerHandle::new(ConsoleSink::stdout(name)),

        SinkConfig::Udp {
            host,
            port,
            address,
            multi_channel,
        } => ConsumerHandle::new(
            UdpForwardSink::new(name, Arc::clone(pool), &host, port, address, multi_channel).await?,
        ),

        SinkConfig::Http { endpoint } => ConsumerHandle::new(HttpPostSink::new(name, endpoint)?),
    };
    Ok(handle)
}
