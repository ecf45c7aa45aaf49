//! Transport-agnostic request construction.
//!
//! Every operation is reduced to a [`ServiceRequest`] before a transport sees
//! it, so URL layout and wire parameters are decided in one place and every
//! backend sends exactly the same thing.

use crate::command::{AcHandling, Command, Keys};
use crate::config::PackmgrConfig;
use crate::package::PackId;
use bytes::Bytes;
use http::Method;
use std::time::Duration;

/// The two service endpoint families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `exec.json`: machine-readable JSON responses.
    Json,
    /// `console.html`: human-readable progress log.
    Html,
}

impl Endpoint {
    pub fn service_path(&self) -> &'static str {
        match self {
            Endpoint::Json => PackmgrConfig::JSON_SERVICE_PATH,
            Endpoint::Html => PackmgrConfig::HTML_SERVICE_PATH,
        }
    }

    /// Bare endpoint URL; only the availability probe targets this.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url, self.service_path())
    }

    /// Package-scoped endpoint URL.
    pub fn package_url(&self, base_url: &str, pack_id: &PackId) -> String {
        format!("{}{}", self.url(base_url), pack_id.archive_path())
    }
}

/// A file sent as a multipart form part.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Multipart(FilePart),
}

/// A fully-specified HTTP exchange for a transport to perform.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Overrides the transport's default request timeout.
    pub timeout: Option<Duration>,
    pub endpoint: Endpoint,
    pub command: Option<Command>,
}

impl ServiceRequest {
    fn post_form(endpoint: Endpoint, url: String, command: Command, extra: Vec<(String, String)>) -> Self {
        let mut form = vec![(Keys::CMD.to_string(), command.as_str().to_string())];
        form.extend(extra);

        Self {
            method: Method::POST,
            url,
            query: Vec::new(),
            body: RequestBody::Form(form),
            timeout: None,
            endpoint,
            command: Some(command),
        }
    }

    /// Look up a form or query parameter by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        let form: &[(String, String)] = match &self.body {
            RequestBody::Form(pairs) => pairs.as_slice(),
            _ => &[],
        };
        self.query
            .iter()
            .chain(form.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Clamp an autosave threshold to the service minimum.
pub fn clamp_autosave(autosave: u32) -> u32 {
    autosave.max(PackmgrConfig::MIN_AUTOSAVE)
}

/// Builds requests against a normalized base URL.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    base_url: &'a str,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self { base_url }
    }

    /// GET against the bare JSON endpoint; the service answers 405 when alive.
    pub fn probe(&self, timeout: Option<Duration>) -> ServiceRequest {
        ServiceRequest {
            method: Method::GET,
            url: Endpoint::Json.url(self.base_url),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout,
            endpoint: Endpoint::Json,
            command: None,
        }
    }

    /// A command that carries only `cmd` and answers with JSON.
    pub fn simple(&self, command: Command, pack_id: &PackId) -> ServiceRequest {
        ServiceRequest::post_form(
            Endpoint::Json,
            Endpoint::Json.package_url(self.base_url, pack_id),
            command,
            Vec::new(),
        )
    }

    /// A command that carries only `cmd` and answers with a progress log.
    pub fn detailed(&self, command: Command, pack_id: &PackId) -> ServiceRequest {
        ServiceRequest::post_form(
            Endpoint::Html,
            Endpoint::Html.package_url(self.base_url, pack_id),
            command,
            Vec::new(),
        )
    }

    pub fn install(
        &self,
        pack_id: &PackId,
        recursive: bool,
        autosave: u32,
        ac_handling: Option<AcHandling>,
    ) -> ServiceRequest {
        let mut extra = vec![
            (Keys::RECURSIVE.to_string(), recursive.to_string()),
            (Keys::AUTOSAVE.to_string(), clamp_autosave(autosave).to_string()),
        ];
        if let Some(policy) = ac_handling {
            extra.push((Keys::AC_HANDLING.to_string(), policy.as_str().to_string()));
        }

        ServiceRequest::post_form(
            Endpoint::Html,
            Endpoint::Html.package_url(self.base_url, pack_id),
            Command::Install,
            extra,
        )
    }

    /// `cmd` and `force` travel in the query string; the archive is the only body part.
    pub fn upload(&self, pack_id: &PackId, force: bool, file_name: &str, bytes: Bytes) -> ServiceRequest {
        ServiceRequest {
            method: Method::POST,
            url: Endpoint::Json.package_url(self.base_url, pack_id),
            query: vec![
                (Keys::CMD.to_string(), Command::Upload.as_str().to_string()),
                (Keys::FORCE.to_string(), force.to_string()),
            ],
            body: RequestBody::Multipart(FilePart {
                field: Keys::PACKAGE.to_string(),
                file_name: file_name.to_string(),
                content_type: PackmgrConfig::MIME_ZIP.to_string(),
                bytes,
            }),
            timeout: None,
            endpoint: Endpoint::Json,
            command: Some(Command::Upload),
        }
    }
}
