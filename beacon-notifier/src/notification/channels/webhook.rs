//! HTTP mail relay channel.
//!
//! Posts `{from, to, subject, body}` as JSON to a relay endpoint that turns it
//! into an email. Any 2xx response counts as accepted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::Serialize;
use tracing::{debug, warn};

use super::{DeliveryChannel, OutgoingMessage};
use crate::Result;
use crate::utils::http_client::build_http_client;

/// Mail relay configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Relay endpoint.
    pub url: String,
    /// Sender address placed in every message.
    pub from_address: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<String>,
    /// Request timeout in seconds. Zero leaves the client without a timeout.
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            from_address: "notifications@localhost".to_string(),
            bearer_token: None,
            timeout_secs: 30,
        }
    }
}

/// JSON body posted to the relay.
#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
    headers: HeaderMap,
}

impl WebhookChannel {
    /// Create the channel. Fails on an empty URL or a token that is not a valid header value.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(crate::Error::config("mail relay URL is empty"));
        }

        let client = build_http_client(Duration::from_secs(config.timeout_secs))?;
        let headers = build_headers(&config)?;

        Ok(Self {
            config,
            client,
            headers,
        })
    }

    fn build_payload<'a>(&'a self, message: &'a OutgoingMessage) -> RelayPayload<'a> {
        RelayPayload {
            from: &self.config.from_address,
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
        }
    }
}

fn build_headers(config: &WebhookConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(token) = &config.bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| crate::Error::config(format!("invalid mail relay token: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .headers(self.headers.clone())
            .json(&self.build_payload(message))
            .send()
            .await
            .map_err(|e| crate::Error::delivery(&message.to, format!("relay request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(to = %message.to, %status, "Mail relay rejected message: {}", body);
            return Err(crate::Error::delivery(
                &message.to,
                format!("relay responded {} - {}", status, body),
            ));
        }

        debug!(to = %message.to, "Mail relay accepted message");
        Ok(())
    }
}
