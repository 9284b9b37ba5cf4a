//! HTTP mail relay client.
//!
//! `POST {relay_url}/send` delivers one message; `GET {relay_url}/replies`
//! lists addresses with replies waiting. Both carry the bearer token when one
//! is configured.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::collaborators::{Draft, Recipient, ReplyPollError, ReplyPoller, SendError, Transport};
use crate::config::TransportConfig;

/// Relay-backed transport and reply poller.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl RelayClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Build from config; `None` when no relay URL is set.
    pub fn from_config(config: &TransportConfig) -> Result<Option<Self>, reqwest::Error> {
        match &config.relay_url {
            Some(url) if !url.trim().is_empty() => Ok(Some(Self::new(
                url.trim(),
                config.api_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    fn auth_header(&self) -> Option<String> {
        self.api_token.as_ref().map(|t| format!("Bearer {}", t))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    replied: Vec<String>,
}

#[async_trait]
impl Transport for RelayClient {
    async fn send(&self, recipient: &Recipient, draft: &Draft) -> Result<(), SendError> {
        let body = SendRequest {
            to: &recipient.email,
            subject: &draft.subject,
            body: &draft.body,
            attachment: draft.attachment.as_deref(),
        };

        let mut request = self.client.post(self.url("send"));
        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        Ok(())
    }
}

#[async_trait]
impl ReplyPoller for RelayClient {
    async fn poll_replies(&self) -> Result<Vec<String>, ReplyPollError> {
        let mut request = self.client.get(self.url("replies"));
        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReplyPollError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReplyPollError::Unavailable(format!("HTTP {}", response.status())));
        }

        let parsed: RepliesResponse = response
            .json()
            .await
            .map_err(|e| ReplyPollError::Parse(e.to_string()))?;

        Ok(parsed.replied)
    }
}
