// HTTP POST forwarding

use crate::streaming::envelope::SampleEnvelope;
use crate::streaming::graph::Consumer;
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each envelope's persisted record as JSON. Any status outside 2xx
/// fails the delivery.
pub struct HttpPostSink {
    name: String,
    endpoint: String,
    client: reqwest::Client,
    posted: u64,
}

impl HttpPostSink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> StreamResult<Self> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint)
            .map_err(|e| StreamError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StreamError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            endpoint,
            client,
            posted: 0,
        })
    }

    pub fn posted(&self) -> u64 {
        self.posted
    }
}

#[async_trait]
impl Consumer for HttpPostSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, envelope: Arc<SampleEnvelope>) -> StreamResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope.to_record())
            .send()
            .await
            .map_err(|e| StreamError::Network(format!("POST {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Network(format!(
                "POST {} returned {}",
                self.endpoint, status
            )));
        }

        self.posted += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(matches!(
            HttpPostSink::new("http", "not a url"),
            Err(StreamError::InvalidConfig(_))
        ));
    }
}
