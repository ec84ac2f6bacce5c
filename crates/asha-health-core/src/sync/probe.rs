//! Connectivity probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::RemoteError;

/// Answers "is the network reachable right now".
///
/// Implementations should return within their own timeout; the engine also bounds
/// every call and treats an overrun as offline.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that fetches a `generate_204` style URL.
///
/// Reachable only on an exact 204, so a captive portal answering 200 counts as offline.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.client.get(&self.url).send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                debug!(url = %self.url, %status, "connectivity probe answered");
                status == StatusCode::NO_CONTENT
            }
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(url = %self.url, "connectivity probe timed out");
                false
            }
        }
    }
}

/// Probe backed by a shared flag, for hosts that already track network state.
#[derive(Clone, Default)]
pub struct StaticProbe {
    online: Arc<AtomicBool>,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
