//! HTTP Forwarder
//!
//! Posts forward envelopes to arbitrary HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::collaborators::traits::Forwarder;
use crate::dispatch::envelope::ForwardEnvelope;
use crate::error::{SubsyncError, SubsyncResult};

/// Header marking requests that were forwarded by us, so a destination that
/// routes back into the same endpoint can recognise the hop
pub const FORWARDED_BY_HEADER: &str = "x-subsync-forwarded-by";

#[derive(Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
    source: String,
}

impl HttpForwarder {
    pub fn new(source: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            source: source.to_string(),
        }
    }

    pub fn with_client(client: reqwest::Client, source: &str, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, url: &str, envelope: &ForwardEnvelope) -> SubsyncResult<()> {
        let target = url::Url::parse(url)
            .map_err(|e| SubsyncError::validation(format!("invalid forward url '{}': {}", url, e)))?;

        let response = self
            .client
            .post(target)
            .timeout(self.timeout)
            .header(FORWARDED_BY_HEADER, &self.source)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubsyncError::timeout("forward", self.timeout)
                } else {
                    SubsyncError::upstream("forward", e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubsyncError::upstream("forward", format!("{} returned {}: {}", url, status, body)));
        }

        debug!("Forwarded notification for {} to {}", envelope.metadata.subscription_id, url);
        Ok(())
    }
}
