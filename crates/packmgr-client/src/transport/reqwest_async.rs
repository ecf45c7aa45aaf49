//! Async transport on `reqwest`.

use super::{reason_phrase, with_timeout, RawResponse, Timeouts, Transport};
use crate::config::{ClientConfig, Credentials, PackmgrConfig};
use crate::request::{RequestBody, ServiceRequest};
use crate::{PackmgrError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::debug;

/// Transport running on the caller's tokio runtime.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeouts: Timeouts,
}

impl ReqwestTransport {
    /// Create a transport with default connect timeout and no overall timeout.
    pub fn new() -> Result<Self> {
        Self::from_config(&ClientConfig::default())
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(Policy::none())
            .user_agent(PackmgrConfig::USER_AGENT);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| PackmgrError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            cause: None,
        })?;

        Ok(Self {
            client,
            timeouts: Timeouts::from_config(config),
        })
    }

    /// Wrap an existing client, e.g. one configured with custom TLS roots.
    ///
    /// The client should not follow redirects, or it will stop behaving like
    /// the other backends.
    pub fn with_client(client: Client, timeouts: Timeouts) -> Self {
        Self { client, timeouts }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn execute(&self, request: &ServiceRequest, credentials: &Credentials) -> Result<RawResponse> {
        let timeout = self.timeouts.effective(request);

        // basic_auth sets the header on this request, so no 401 round trip is needed.
        let mut builder = self
            .client
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
            .await
            .map_err(|e| with_timeout(PackmgrError::from(e), timeout))?;
        let status = response.status();
        let reason = reason_phrase(response.extensions());
        let headers = response.headers().clone();
        debug!("{} {} -> {}", request.method, request.url, status);

        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| with_timeout(PackmgrError::from(e), timeout)))
            .boxed();

        Ok(RawResponse::streaming(status, headers, body).with_reason(reason))
    }
}
