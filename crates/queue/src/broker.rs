//! HTTP client for the external push broker.

use std::time::Duration;

use async_trait::async_trait;
use habitgraph_core::{BrokerError, PushBroker, PushMessage};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

#[derive(Serialize)]
struct BatchRequest<'a> {
    messages: &'a [PushMessage],
}

/// Push broker reached over HTTP.
///
/// Batches are POSTed as `{"messages": [...]}` to `{base}/v1/push/batch`.
/// The HTTP client and its connection pool are released by `close`.
pub struct HttpPushBroker {
    client: RwLock<Option<reqwest::Client>>,
    base_url: Url,
    batch_url: Url,
}

impl HttpPushBroker {
    /// Create a broker client.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| BrokerError::Transport(format!("Invalid broker URL: {e}")))?;
        // A base without a trailing slash would lose its last segment on join.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let batch_url = base_url
            .join("v1/push/batch")
            .map_err(|e| BrokerError::Transport(format!("Invalid broker URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("habitgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            base_url,
            batch_url,
        })
    }

    async fn client(&self) -> Result<reqwest::Client, BrokerError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| BrokerError::Transport("Push broker client is closed".to_string()))
    }
}

#[async_trait]
impl PushBroker for HttpPushBroker {
    async fn probe(&self) -> Result<(), BrokerError> {
        let response = self
            .client()
            .await?
            .head(self.base_url.clone())
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(BrokerError::Rejected(status.as_u16()));
        }

        debug!(status = %status, "Push broker probe succeeded");
        Ok(())
    }

    async fn send_batch(&self, batch: &[PushMessage]) -> Result<(), BrokerError> {
        let response = self
            .client()
            .await?
            .post(self.batch_url.clone())
            .json(&BatchRequest { messages: batch })
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Rejected(status.as_u16()));
        }
        Ok(())
    }

    async fn close(&self) {
        if self.client.write().await.take().is_none() {
            return;
        }
        info!(broker = %self.base_url, "Push broker client closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_url_is_under_base() {
        let broker = HttpPushBroker::new("http://broker.internal/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            broker.batch_url.as_str(),
            "http://broker.internal/v1/push/batch"
        );
    }

    #[test]
    fn test_batch_url_keeps_base_path() {
        let broker = HttpPushBroker::new("http://broker.internal/api", Duration::from_secs(1)).unwrap();
        assert_eq!(
            broker.batch_url.as_str(),
            "http://broker.internal/api/v1/push/batch"
        );
        assert_eq!(broker.base_url.as_str(), "http://broker.internal/api/");

        let broker = HttpPushBroker::new("http://broker.internal/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            broker.batch_url.as_str(),
            "http://broker.internal/api/v1/push/batch"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            HttpPushBroker::new("not a url", Duration::from_secs(1)),
            Err(BrokerError::Transport(_))
        ));
    }
}
