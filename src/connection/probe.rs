use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::ClientError;

/// Reachability check for one candidate base address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, base_url: &str) -> bool;
}

/// Issues a single bounded GET against the health path. Anything other than
/// a 2xx within the timeout counts as unreachable.
pub struct HttpProbe {
    client: Client,
    health_path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(health_path: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            health_path: health_path.into(),
            timeout,
        })
    }

    fn health_url(&self, base_url: &str) -> String {
        let path = self.health_path.trim_start_matches('/');
        format!("{}/{}", base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, base_url: &str) -> bool {
        let url = self.health_url(base_url);
        debug!(url = %url, "Probing backend candidate");

        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                let reachable = status.is_success();
                debug!(url = %url, status = %status, reachable, "Probe complete");
                reachable
            }
            Err(e) => {
                debug!(url = %url, error = %e, timeout = e.is_timeout(), "Probe failed");
                false
            }
        }
    }
}
