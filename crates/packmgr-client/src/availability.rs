//! Waiting for the package manager service to come online.
//!
//! A freshly started server accepts connections well before its package
//! manager is ready. The service answers a bare GET on its JSON endpoint with
//! `405 Method Not Allowed` once it is up, so the poller probes that endpoint
//! with a linearly growing backoff until it sees a 405, a fatal failure, or the
//! deadline.

use crate::cancel::CancellationToken;
use crate::config::PackmgrConfig;
use crate::{PackmgrError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Overall bound on a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Unbounded,
    Bounded(Duration),
}

impl WaitTimeout {
    /// Negative values wait forever.
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Ok(millis) => WaitTimeout::Bounded(Duration::from_millis(millis)),
            Err(_) => WaitTimeout::Unbounded,
        }
    }

    fn deadline(&self, start: Instant) -> Option<Instant> {
        match self {
            // An unrepresentable deadline is as good as none.
            WaitTimeout::Bounded(timeout) => start.checked_add(*timeout),
            WaitTimeout::Unbounded => None,
        }
    }
}

/// Non-fatal outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// The service answered, but not with the readiness status.
    Unavailable { status: u16 },
}

/// Sleep before probe `attempt`; the first probe is immediate.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt)).min(PackmgrConfig::MAX_PROBE_BACKOFF)
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Probe until the service is available.
///
/// `probe` receives the remaining budget (`None` when unbounded) to use as its
/// own request timeout. A probe error aborts the wait, except that a probe
/// timing out once the wait's deadline has passed is reported as
/// [`PackmgrError::ServiceTimeout`].
pub async fn wait_for_service<F, Fut>(
    timeout: WaitTimeout,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<()>
where
    F: FnMut(Option<Duration>) -> Fut,
    Fut: Future<Output = Result<Availability>>,
{
    let deadline = timeout.deadline(Instant::now());
    let mut attempt: u32 = 0;

    loop {
        if expired(deadline) {
            warn!("Service not available after {} probes", attempt);
            return Err(PackmgrError::ServiceTimeout);
        }

        let delay = backoff_delay(attempt);
        if !delay.is_zero() {
            debug!("Waiting {:?} before probe {}", delay, attempt + 1);
            tokio::select! {
                _ = cancel.cancelled() => return Err(PackmgrError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if expired(deadline) {
                warn!("Service not available after {} probes", attempt);
                return Err(PackmgrError::ServiceTimeout);
            }
        }
        cancel.check()?;

        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match probe(remaining).await {
            Ok(Availability::Available) => {
                info!("Service available after {} probes", attempt + 1);
                return Ok(());
            }
            Ok(Availability::Unavailable { status }) => {
                debug!("Probe {} answered {}, service not ready", attempt + 1, status);
            }
            Err(PackmgrError::Timeout(_)) if expired(deadline) => {
                warn!("Probe {} exceeded the remaining wait budget", attempt + 1);
                return Err(PackmgrError::ServiceTimeout);
            }
            Err(e) => {
                warn!("Probe {} failed: {}", attempt + 1, e);
                return Err(e);
            }
        }

        attempt = attempt.saturating_add(1);
    }
}
