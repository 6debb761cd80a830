//! Health check seam and built-in checks.
//!
//! Anything that can answer "is this service usable right now?" with a
//! [`HealthResult`] can be registered with the probe. Closures go through
//! [`check_fn`]; the built-ins cover the common cases of a TCP port, a
//! systemd unit and a circuit breaker.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
#[cfg(feature = "builtin-checks")]
use std::time::Duration;

use async_trait::async_trait;

use super::state::HealthResult;
use crate::error::BoxError;
use crate::resilience::{CircuitBreaker, CircuitState};

/// A single health check.
///
/// Returning `Err` is equivalent to returning a failing result; the probe
/// records it with a `check_exception: ` reason. Panics are caught the same
/// way.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self) -> Result<HealthResult, BoxError>;
}

#[async_trait]
impl<T: HealthCheck + ?Sized> HealthCheck for Arc<T> {
    async fn check(&self) -> Result<HealthResult, BoxError> {
        (**self).check().await
    }
}

/// [`HealthCheck`] backed by an async closure. Built by [`check_fn`].
pub struct FnCheck<F> {
    f: F,
}

impl<F> fmt::Debug for FnCheck<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCheck").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a [`HealthCheck`].
///
/// ```rust
/// use meshgate_link::probe::{check_fn, HealthResult};
/// use meshgate_link::BoxError;
///
/// let check = check_fn(|| async { Ok::<_, BoxError>(HealthResult::pass("ok")) });
/// # let _ = check;
/// ```
pub fn check_fn<F, Fut>(f: F) -> FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthResult, BoxError>> + Send + 'static,
{
    FnCheck { f }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthResult, BoxError>> + Send + 'static,
{
    async fn check(&self) -> Result<HealthResult, BoxError> {
        (self.f)().await
    }
}

/// Healthy unless the wrapped breaker is open.
#[derive(Debug, Clone)]
pub struct BreakerCheck {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerCheck {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl HealthCheck for BreakerCheck {
    async fn check(&self) -> Result<HealthResult, BoxError> {
        Ok(match self.breaker.state() {
            CircuitState::Closed => HealthResult::pass("circuit_closed"),
            CircuitState::HalfOpen => HealthResult::pass("circuit_half_open"),
            CircuitState::Open => HealthResult::fail("circuit_open"),
        })
    }
}

/// Healthy when a TCP connection to `host:port` succeeds within the timeout.
#[cfg(feature = "builtin-checks")]
#[derive(Debug, Clone)]
pub struct TcpPortCheck {
    host: String,
    port: u16,
    timeout: Duration,
}

#[cfg(feature = "builtin-checks")]
impl TcpPortCheck {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, timeout: Duration::from_secs(5) }
    }

    /// Shortcut for a port on `localhost`.
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(feature = "builtin-checks")]
#[async_trait]
impl HealthCheck for TcpPortCheck {
    async fn check(&self) -> Result<HealthResult, BoxError> {
        let addr = (self.host.as_str(), self.port);
        let connect = tokio::net::TcpStream::connect(addr);
        Ok(match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_stream)) => HealthResult::pass("connected"),
            Ok(Err(e)) => match e.raw_os_error() {
                Some(code) => HealthResult::fail(format!("connect_failed_{code}")),
                None => HealthResult::fail(format!("socket_error: {e}")),
            },
            Err(_) => HealthResult::fail("timeout"),
        })
    }
}

/// Healthy when `systemctl is-active <unit>` prints `active`.
#[cfg(feature = "builtin-checks")]
#[derive(Debug, Clone)]
pub struct SystemdServiceCheck {
    unit: String,
    timeout: Duration,
}

#[cfg(feature = "builtin-checks")]
impl SystemdServiceCheck {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into(), timeout: Duration::from_secs(5) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(feature = "builtin-checks")]
#[async_trait]
impl HealthCheck for SystemdServiceCheck {
    async fn check(&self) -> Result<HealthResult, BoxError> {
        let output = tokio::process::Command::new("systemctl")
            .arg("is-active")
            .arg(&self.unit)
            .kill_on_drop(true)
            .output();

        Ok(match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => {
                let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if status == "active" {
                    HealthResult::pass("active")
                } else {
                    HealthResult::fail(format!("status_{status}"))
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                HealthResult::fail("systemctl_not_found")
            }
            Ok(Err(e)) => HealthResult::fail(e.to_string().chars().take(100).collect::<String>()),
            Err(_) => HealthResult::fail("timeout"),
        })
    }
}
