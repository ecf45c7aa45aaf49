//! Packmgr - Client library for the CRX Package Manager HTTP service.
//!
//! Identifies content package archives and drives the remote package manager:
//! upload, install, uninstall, build, rewrap, dry-run, delete and replicate,
//! plus waiting for the service to come online after a server start.
//!
//! The protocol lives in one place, [`PackmgrClient`]. The HTTP exchange is
//! delegated to a [`Transport`] chosen at construction:
//!
//! | Backend | Feature | Constructor |
//! |---|---|---|
//! | async `reqwest` | `async-http` | [`PackmgrClient::reqwest`] |
//! | `reqwest::blocking` | `blocking-http` | [`PackmgrClient::blocking`] |
//! | `ureq` | `ureq-http` | [`PackmgrClient::ureq`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use packmgr::{ClientConfig, PackmgrClient};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> packmgr::Result<()> {
//!     let client = PackmgrClient::reqwest(&ClientConfig::from_env()?)?;
//!     client.wait_for_service(60_000).await?;
//!
//!     let archive = Path::new("site-content-1.0.zip");
//!     let pack_id = client.identify(archive).await?.expect("not a package");
//!     client.upload(archive, true, Some(&pack_id)).await?;
//!
//!     let result = client.install(&pack_id, true, 1024, None, None).await?;
//!     println!("{} ({} errors)", result.message, result.progress_errors.len());
//!     Ok(())
//! }
//! ```

pub mod availability;
pub mod cancel;
pub mod command;
pub mod config;
pub mod error;
pub mod package;
pub mod request;
pub mod response;
pub mod transport;

mod client;

pub use availability::{Availability, WaitTimeout};
pub use cancel::{CancellationToken, CancelledError};
pub use client::PackmgrClient;
pub use command::{AcHandling, Command};
pub use config::{ClientConfig, Credentials, PackmgrConfig};
pub use error::{PackmgrError, Result};
pub use package::{identify, PackId};
pub use response::{DetailedResponse, ProgressListener, SimpleResponse};
pub use transport::{BodyStream, RawResponse, Timeouts, Transport};

#[cfg(feature = "blocking-http")]
pub use transport::BlockingTransport;
#[cfg(feature = "async-http")]
pub use transport::ReqwestTransport;
#[cfg(feature = "ureq-http")]
pub use transport::UreqTransport;
