//! Blocking transport on `ureq`.

use super::multipart;
use super::{run_blocking, with_timeout, BlockingHead, RawResponse, Timeouts, Transport};
use crate::config::{ClientConfig, Credentials, PackmgrConfig};
use crate::request::{RequestBody, ServiceRequest};
use crate::{PackmgrError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::time::Duration;
use tracing::debug;
use ureq::{Agent, AgentBuilder};

/// Transport on a shared `ureq` agent, driven from the blocking pool.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: Agent,
    timeouts: Timeouts,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut builder = AgentBuilder::new()
            .timeout_connect(config.connect_timeout())
            .redirects(0)
            .user_agent(PackmgrConfig::USER_AGENT);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Self {
            agent: builder.build(),
            timeouts: Timeouts::from_config(config),
        }
    }

    /// Wrap an existing agent. It should be built with `redirects(0)`.
    pub fn with_agent(agent: Agent, timeouts: Timeouts) -> Self {
        Self { agent, timeouts }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn basic_auth(credentials: &Credentials) -> String {
    let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    format!("Basic {}", token)
}

fn into_head(response: ureq::Response) -> Result<BlockingHead> {
    let status = StatusCode::from_u16(response.status()).map_err(|e| PackmgrError::Network {
        message: format!("Invalid status code {}: {}", response.status(), e),
        cause: None,
    })?;
    let reason = Some(response.status_text().to_string());

    let mut headers = HeaderMap::new();
    for name in response.headers_names() {
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in response.all(&name) {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(header.clone(), value);
            }
        }
    }

    Ok(BlockingHead {
        status,
        reason,
        headers,
        body: response.into_reader(),
    })
}

fn execute_blocking(
    agent: &Agent,
    request: &ServiceRequest,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<BlockingHead> {
    let mut call = agent
        .request(request.method.as_str(), &request.url)
        .set("Authorization", &basic_auth(credentials));

    for (key, value) in &request.query {
        call = call.query(key, value);
    }
    if let Some(timeout) = request.timeout {
        call = call.timeout(timeout);
    }

    let result = match &request.body {
        RequestBody::Empty => call.call(),
        RequestBody::Form(pairs) => {
            let pairs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            call.send_form(&pairs)
        }
        RequestBody::Multipart(file) => {
            let body = multipart::encode(file);
            call.set("Content-Type", &body.content_type).send_bytes(&body.bytes)
        }
    };

    match result {
        Ok(response) => into_head(response),
        // ureq reports 4xx/5xx as errors; they are ordinary responses here.
        Err(ureq::Error::Status(_, response)) => into_head(response),
        Err(err) => Err(with_timeout(PackmgrError::from(err), timeout)),
    }
}

#[async_trait]
impl Transport for UreqTransport {
    fn name(&self) -> &'static str {
        "ureq"
    }

    async fn execute(&self, request: &ServiceRequest, credentials: &Credentials) -> Result<RawResponse> {
        let agent = self.agent.clone();
        let timeout = self.timeouts.effective(request);
        let owned_request = request.clone();
        let credentials = credentials.clone();

        let response = run_blocking(
            move || execute_blocking(&agent, &owned_request, &credentials, timeout),
            timeout,
        )
        .await?;

        debug!("{} {} -> {}", request.method, request.url, response.status);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(
            basic_auth(&Credentials::new("admin", "admin")),
            "Basic YWRtaW46YWRtaW4="
        );
    }
}
