//! The package manager client.
//!
//! `PackmgrClient` owns the base URL and credentials, builds every request,
//! and parses every response. Network I/O goes through a [`Transport`], so
//! the same client behaves identically on each backend.

use crate::availability::{self, Availability, WaitTimeout};
use crate::cancel::CancellationToken;
use crate::command::{AcHandling, Command};
use crate::config::{normalize_base_url, ClientConfig, Credentials};
use crate::package::{self, PackId};
use crate::request::{RequestBuilder, ServiceRequest};
use crate::response::{
    read_detailed_response, read_simple_response, DetailedResponse, ProgressListener,
    SimpleResponse,
};
use crate::transport::{RawResponse, Transport};
use crate::{PackmgrError, Result};
use bytes::Bytes;
use http::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Client for one package manager service.
#[derive(Clone)]
pub struct PackmgrClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    credentials: Credentials,
}

impl std::fmt::Debug for PackmgrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackmgrClient")
            .field("transport", &self.transport.name())
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl PackmgrClient {
    /// Create a client on an explicit transport.
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        info!("Package manager client for {} on {}", base_url, transport.name());

        Ok(Self {
            transport,
            base_url,
            credentials: config.credentials(),
        })
    }

    /// Client on async `reqwest`.
    #[cfg(feature = "async-http")]
    pub fn reqwest(config: &ClientConfig) -> Result<Self> {
        let transport = crate::transport::ReqwestTransport::from_config(config)?;
        Self::new(Arc::new(transport), config)
    }

    /// Client on `reqwest::blocking`.
    #[cfg(feature = "blocking-http")]
    pub fn blocking(config: &ClientConfig) -> Result<Self> {
        let transport = crate::transport::BlockingTransport::from_config(config);
        Self::new(Arc::new(transport), config)
    }

    /// Client on `ureq`.
    #[cfg(feature = "ureq-http")]
    pub fn ureq(config: &ClientConfig) -> Result<Self> {
        let transport = crate::transport::UreqTransport::from_config(config);
        Self::new(Arc::new(transport), config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Point the client at another server. Trailing slashes are dropped.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<()> {
        self.base_url = normalize_base_url(base_url)?;
        debug!("Base URL set to {}", self.base_url);
        Ok(())
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    fn requests(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.base_url)
    }

    async fn send(&self, request: &ServiceRequest) -> Result<RawResponse> {
        match request.command {
            Some(command) => info!("{} {}", command, request.url),
            None => debug!("{} {}", request.method, request.url),
        }

        self.transport
            .execute(request, &self.credentials)
            .await?
            .authorized()
    }

    async fn execute_simple(&self, request: ServiceRequest) -> Result<SimpleResponse> {
        let response = self.send(&request).await?;

        let parsed = read_simple_response(response).await;
        match &parsed {
            Ok(result) => debug!("{} -> {}", request.url, result),
            Err(e) => warn!("{} failed: {}", request.url, e),
        }
        parsed
    }

    async fn execute_detailed(
        &self,
        request: ServiceRequest,
        pack_id: &PackId,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<DetailedResponse> {
        let started = Instant::now();
        let response = self.send(&request).await?;

        let mut detailed = read_detailed_response(response, &pack_id.archive_path(), listener)
            .await
            .inspect_err(|e| warn!("{} failed: {}", request.url, e))?;
        detailed.duration = started.elapsed();

        info!(
            "{} {}: success={} in {:?} ({} progress errors)",
            request.command.map(|c| c.as_str()).unwrap_or("command"),
            pack_id,
            detailed.success,
            detailed.duration,
            detailed.progress_errors.len()
        );
        Ok(detailed)
    }

    /// One availability probe. `timeout` bounds the request.
    pub async fn probe(&self, timeout: Option<Duration>) -> Result<Availability> {
        let response = self.send(&self.requests().probe(timeout)).await?;

        if response.status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(Availability::Available)
        } else {
            Ok(Availability::Unavailable {
                status: response.status.as_u16(),
            })
        }
    }

    /// Wait for the service to come online. A negative timeout waits forever.
    pub async fn wait_for_service(&self, timeout_millis: i64) -> Result<()> {
        self.wait_for_service_with(WaitTimeout::from_millis(timeout_millis), &CancellationToken::new())
            .await
    }

    /// Like [`wait_for_service`](Self::wait_for_service), but cancellable.
    pub async fn wait_for_service_with(&self, timeout: WaitTimeout, cancel: &CancellationToken) -> Result<()> {
        availability::wait_for_service(timeout, cancel, |remaining| self.probe(remaining)).await
    }

    /// Identify a local package archive.
    pub async fn identify(&self, path: &Path) -> Result<Option<PackId>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || package::identify(&path))
            .await
            .map_err(|e| PackmgrError::Network {
                message: format!("Package inspection task failed: {}", e),
                cause: None,
            })?
    }

    /// Whether the package is present on the server.
    pub async fn exists_on_server(&self, pack_id: &PackId) -> Result<bool> {
        let response = self
            .execute_simple(self.requests().simple(Command::Contents, pack_id))
            .await?;
        Ok(response.success)
    }

    /// List the package contents through the console endpoint.
    pub async fn contents(
        &self,
        pack_id: &PackId,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<DetailedResponse> {
        self.execute_detailed(self.requests().detailed(Command::Contents, pack_id), pack_id, listener)
            .await
    }

    /// Upload an archive. Without `pack_id` the archive is identified first.
    pub async fn upload(&self, file: &Path, force: bool, pack_id: Option<&PackId>) -> Result<SimpleResponse> {
        let metadata = tokio::fs::metadata(file).await.ok();
        if !metadata.is_some_and(|m| m.is_file()) {
            return Err(PackmgrError::invalid_argument(
                "file",
                format!("{} is not a readable file", file.display()),
            ));
        }

        let pack_id = match pack_id {
            Some(pack_id) => pack_id.clone(),
            None => self
                .identify(file)
                .await?
                .ok_or_else(|| PackmgrError::NotAPackage(file.to_path_buf()))?,
        };

        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| PackmgrError::io_with_path(e, file))?;
        let file_name = upload_file_name(file, &pack_id);
        debug!("Uploading {} ({} bytes) as {}", file.display(), bytes.len(), pack_id);

        self.execute_simple(
            self.requests()
                .upload(&pack_id, force, &file_name, Bytes::from(bytes)),
        )
        .await
    }

    pub async fn delete(&self, pack_id: &PackId) -> Result<SimpleResponse> {
        self.execute_simple(self.requests().simple(Command::Delete, pack_id))
            .await
    }

    pub async fn replicate(&self, pack_id: &PackId) -> Result<SimpleResponse> {
        self.execute_simple(self.requests().simple(Command::Replicate, pack_id))
            .await
    }

    /// Install an uploaded package.
    ///
    /// `autosave` is raised to the service minimum when lower. `ac_handling`
    /// is only sent when set, leaving the package's own policy otherwise.
    pub async fn install(
        &self,
        pack_id: &PackId,
        recursive: bool,
        autosave: u32,
        ac_handling: Option<AcHandling>,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<DetailedResponse> {
        let request = self
            .requests()
            .install(pack_id, recursive, autosave, ac_handling);
        self.execute_detailed(request, pack_id, listener).await
    }

    pub async fn uninstall(
        &self,
        pack_id: &PackId,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<DetailedResponse> {
        self.execute_detailed(self.requests().detailed(Command::Uninstall, pack_id), pack_id, listener)
            .await
    }

    pub async fn build(&self, pack_id: &PackId, listener: Option<&dyn ProgressListener>) -> Result<DetailedResponse> {
        self.execute_detailed(self.requests().detailed(Command::Build, pack_id), pack_id, listener)
            .await
    }

    pub async fn rewrap(&self, pack_id: &PackId, listener: Option<&dyn ProgressListener>) -> Result<DetailedResponse> {
        self.execute_detailed(self.requests().detailed(Command::Rewrap, pack_id), pack_id, listener)
            .await
    }

    /// Simulate an install without changing the repository.
    pub async fn dry_run(&self, pack_id: &PackId, listener: Option<&dyn ProgressListener>) -> Result<DetailedResponse> {
        self.execute_detailed(self.requests().detailed(Command::DryRun, pack_id), pack_id, listener)
            .await
    }
}

fn upload_file_name(file: &Path, pack_id: &PackId) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| {
            PathBuf::from(pack_id.archive_path())
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use async_trait::async_trait;
    use http::HeaderMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records what it was asked to send.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<(u16, &'static str)>>,
        requests: Mutex<Vec<ServiceRequest>>,
        users: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with(responses: &[(u16, &'static str)]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().copied().collect()),
                ..Default::default()
            })
        }

        fn requests(&self) -> Vec<ServiceRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, request: &ServiceRequest, credentials: &Credentials) -> Result<RawResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.users.lock().unwrap().push(credentials.username.clone());
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            Ok(RawResponse::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Bytes::from_static(body.as_bytes()),
            ))
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> PackmgrClient {
        PackmgrClient::new(transport, &ClientConfig::default()).unwrap()
    }

    fn pack() -> PackId {
        PackId::new("my_packages", "site", Some("1.0")).unwrap()
    }

    #[test]
    fn test_base_url_normalized() {
        let mut client = client(ScriptedTransport::with(&[]));
        assert_eq!(client.base_url(), "http://localhost:4502");

        client.set_base_url("http://author:4502///").unwrap();
        assert_eq!(client.base_url(), "http://author:4502");

        assert!(matches!(
            client.set_base_url("not a url"),
            Err(PackmgrError::InvalidArgument { .. })
        ));
        assert_eq!(client.base_url(), "http://author:4502");
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", client(ScriptedTransport::with(&[])));
        assert!(rendered.contains("scripted"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("password: \"admin\""));
    }

    #[tokio::test]
    async fn test_probe_statuses() {
        let transport = ScriptedTransport::with(&[(405, ""), (503, ""), (401, "")]);
        let client = client(transport.clone());

        assert_eq!(client.probe(None).await.unwrap(), Availability::Available);
        assert_eq!(
            client.probe(None).await.unwrap(),
            Availability::Unavailable { status: 503 }
        );
        assert!(matches!(client.probe(None).await, Err(PackmgrError::Unauthorized)));

        let requests = transport.requests();
        assert!(requests.iter().all(|r| r.method == http::Method::GET));
        assert!(requests.iter().all(|r| r.url.ends_with("/exec.json")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_retries_until_405() {
        let transport = ScriptedTransport::with(&[(503, ""), (404, ""), (405, "")]);
        let client = client(transport.clone());

        client.wait_for_service(-1).await.unwrap();
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_aborts_on_401() {
        let transport = ScriptedTransport::with(&[(503, ""), (401, "")]);
        let client = client(transport.clone());

        let err = client.wait_for_service(60_000).await.unwrap_err();
        assert!(matches!(err, PackmgrError::Unauthorized));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_exists_on_server() {
        let transport = ScriptedTransport::with(&[
            (200, r#"{"success":true,"msg":"found"}"#),
            (200, r#"{"success":false,"msg":"not found"}"#),
        ]);
        let client = client(transport.clone());

        assert!(client.exists_on_server(&pack()).await.unwrap());
        assert!(!client.exists_on_server(&pack()).await.unwrap());

        let request = &transport.requests()[0];
        assert_eq!(request.param("cmd"), Some("contents"));
        assert!(request.url.contains("/exec.json/etc/packages/"));
    }

    #[tokio::test]
    async fn test_simple_commands() {
        let transport = ScriptedTransport::with(&[
            (200, r#"{"success":true,"msg":"Package deleted"}"#),
            (200, r#"{"success":true,"msg":"Package replicated"}"#),
            (400, "unknown command"),
        ]);
        let client = client(transport.clone());

        assert_eq!(client.delete(&pack()).await.unwrap().message, "Package deleted");
        assert_eq!(client.replicate(&pack()).await.unwrap().message, "Package replicated");
        assert!(matches!(
            client.delete(&pack()).await,
            Err(PackmgrError::CommandNotSupported)
        ));

        let commands: Vec<_> = transport
            .requests()
            .iter()
            .map(|r| r.param("cmd").unwrap().to_string())
            .collect();
        assert_eq!(commands, vec!["delete", "replicate", "delete"]);
    }

    #[tokio::test]
    async fn test_command_401_is_unauthorized() {
        let transport = ScriptedTransport::with(&[(401, "")]);
        let err = client(transport).build(&pack(), None).await.unwrap_err();
        assert!(matches!(err, PackmgrError::Unauthorized));
    }

    #[tokio::test]
    async fn test_detailed_commands_use_console() {
        let transport = ScriptedTransport::with(&[
            (200, "<div class=\"success\">Package built</div>"),
            (200, "<div class=\"success\">Package rewrapped</div>"),
            (200, "<div class=\"success\">Package uninstalled</div>"),
            (200, "<div class=\"success\">Dry run complete</div>"),
            (200, "A /apps\n<div class=\"success\">Listed</div>"),
        ]);
        let client = client(transport.clone());
        let pack = pack();

        assert!(client.build(&pack, None).await.unwrap().success);
        assert!(client.rewrap(&pack, None).await.unwrap().success);
        assert!(client.uninstall(&pack, None).await.unwrap().success);
        assert!(client.dry_run(&pack, None).await.unwrap().success);
        let listing = client.contents(&pack, None).await.unwrap();
        assert_eq!(listing.message, "Listed");
        assert_eq!(listing.path, "/etc/packages/my_packages/site-1.0.zip");

        let requests = transport.requests();
        let commands: Vec<_> = requests.iter().map(|r| r.param("cmd").unwrap()).collect();
        assert_eq!(commands, vec!["build", "rewrap", "uninstall", "dryrun", "contents"]);
        assert!(requests.iter().all(|r| r.url.contains("/console.html/etc/packages/")));
    }

    #[tokio::test]
    async fn test_install_params_and_listener() {
        let transport = ScriptedTransport::with(&[(
            200,
            "<b>A</b> /apps/site\n<b>E</b> /apps/broken\n<div class=\"success\">Package installed</div>",
        )]);
        let client = client(transport.clone());

        let lines = Mutex::new(Vec::new());
        let listener = |action: &str, message: &str| {
            lines.lock().unwrap().push((action.to_string(), message.to_string()));
        };

        let response = client
            .install(&pack(), true, 100, Some(AcHandling::Overwrite), Some(&listener))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.message, "Package installed");
        assert_eq!(response.progress_errors, vec!["E /apps/broken".to_string()]);
        assert_eq!(lines.lock().unwrap().len(), 2);

        let request = &transport.requests()[0];
        assert_eq!(request.param("recursive"), Some("true"));
        assert_eq!(request.param("autosave"), Some("1024"));
        assert_eq!(request.param("acHandling"), Some("overwrite"));
    }

    #[tokio::test]
    async fn test_credentials_follow_reconfiguration() {
        let transport = ScriptedTransport::with(&[(405, ""), (405, "")]);
        let mut client = client(transport.clone());

        client.probe(None).await.unwrap();
        client.set_credentials(Credentials::new("deployer", "secret"));
        client.probe(None).await.unwrap();

        assert_eq!(*transport.users.lock().unwrap(), vec!["admin", "deployer"]);
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails_before_io() {
        let transport = ScriptedTransport::with(&[]);
        let client = client(transport.clone());

        let err = client
            .upload(Path::new("/nonexistent/site.zip"), false, Some(&pack()))
            .await
            .unwrap_err();
        assert!(matches!(err, PackmgrError::InvalidArgument { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_upload_with_explicit_id() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("site.zip");
        std::fs::write(&file, b"PK\x05\x06").unwrap();

        let transport = ScriptedTransport::with(&[(200, r#"{"success":true,"msg":"Package uploaded","path":"/etc/packages/my_packages/site-1.0.zip"}"#)]);
        let client = client(transport.clone());

        let response = client.upload(&file, true, Some(&pack())).await.unwrap();
        assert!(response.success);
        assert_eq!(response.path, "/etc/packages/my_packages/site-1.0.zip");

        let request = &transport.requests()[0];
        assert_eq!(request.param("force"), Some("true"));
        match &request.body {
            RequestBody::Multipart(part) => {
                assert_eq!(part.file_name, "site.zip");
                assert_eq!(part.bytes.as_ref(), b"PK\x05\x06");
            }
            other => panic!("expected multipart body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_non_package_zip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.zip");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&file).unwrap());
            zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut zip, b"hello").unwrap();
            zip.finish().unwrap();
        }

        let transport = ScriptedTransport::with(&[]);
        let err = client(transport.clone())
            .upload(&file, false, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PackmgrError::NotAPackage(path) if path == file));
        assert!(transport.requests().is_empty());
    }
}
