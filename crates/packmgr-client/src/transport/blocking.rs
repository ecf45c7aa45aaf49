//! Blocking transport on `reqwest::blocking`.
//!
//! `reqwest::blocking::Client` panics when built or driven from inside an
//! async context, so the client is created lazily on the blocking pool and
//! every exchange runs there too.

use super::{reason_phrase, run_blocking, with_timeout, BlockingHead, RawResponse, Timeouts, Transport};
use crate::config::{ClientConfig, Credentials, PackmgrConfig};
use crate::request::{RequestBody, ServiceRequest};
use crate::{PackmgrError, Result};
use async_trait::async_trait;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Transport that performs each exchange synchronously on a blocking thread.
#[derive(Debug, Clone)]
pub struct BlockingTransport {
    client: Arc<OnceLock<Client>>,
    timeouts: Timeouts,
}

impl BlockingTransport {
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            client: Arc::new(OnceLock::new()),
            timeouts: Timeouts::from_config(config),
        }
    }

    /// Must only be called from the blocking pool.
    fn client(cell: &OnceLock<Client>, timeouts: Timeouts) -> Result<Client> {
        if let Some(client) = cell.get() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .redirect(Policy::none())
            .user_agent(PackmgrConfig::USER_AGENT)
            .build()
            .map_err(|e| PackmgrError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(cell.get_or_init(|| client).clone())
    }
}

impl Default for BlockingTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn execute_blocking(
    client: &Client,
    request: &ServiceRequest,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<BlockingHead> {
    let mut builder = client
        .request(request.method.clone(), &request.url)
        .basic_auth(&credentials.username, Some(&credentials.password));

    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    builder = match &request.body {
        RequestBody::Empty => builder,
        RequestBody::Form(pairs) => builder.form(pairs),
        RequestBody::Multipart(file) => {
            let part = Part::bytes(file.bytes.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&file.content_type)?;
            builder.multipart(Form::new().part(file.field.clone(), part))
        }
    };

    let response = builder
        .send()
        .map_err(|e| with_timeout(PackmgrError::from(e), timeout))?;

    Ok(BlockingHead {
        status: response.status(),
        reason: reason_phrase(response.extensions()),
        headers: response.headers().clone(),
        body: Box::new(response),
    })
}

#[async_trait]
impl Transport for BlockingTransport {
    fn name(&self) -> &'static str {
        "reqwest-blocking"
    }

    async fn execute(&self, request: &ServiceRequest, credentials: &Credentials) -> Result<RawResponse> {
        let cell = Arc::clone(&self.client);
        let timeouts = self.timeouts;
        let timeout = timeouts.effective(request);
        let owned_request = request.clone();
        let credentials = credentials.clone();

        let response = run_blocking(
            move || {
                let client = Self::client(&cell, timeouts)?;
                execute_blocking(&client, &owned_request, &credentials, timeout)
            },
            timeout,
        )
        .await?;

        debug!("{} {} -> {}", request.method, request.url, response.status);
        Ok(response)
    }
}
