//! Web application process lifecycle

use crate::config::ServeConfig;
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

// ============================================================================
// Trait Definitions
// ============================================================================

/// How to start the web application
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub binary: String,
    pub host: String,
    pub port: u16,
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    pub fn from_config(config: &ServeConfig) -> Self {
        Self {
            binary: config.app_binary.clone(),
            host: config.host.clone(),
            port: config.port,
            extra_args: config.extra_args.clone(),
        }
    }

    /// `launch -- --listen <host> --port <port> [extra...]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "launch".to_string(),
            "--".to_string(),
            "--listen".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Address to probe for readiness. Wildcard listens are probed on loopback.
    pub fn probe_addr(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// A single supervised child process
#[async_trait]
pub trait AppProcess: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> DeployResult<()>;

    /// Exit status if the process has exited, None while it runs
    async fn try_wait(&self) -> DeployResult<Option<ExitStatus>>;

    /// Stop gracefully, escalating to a kill after `timeout`
    async fn stop(&self, timeout: Duration) -> DeployResult<()>;

    async fn pid(&self) -> Option<u32>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Runs the web application with tokio::process
#[derive(Default)]
pub struct SystemAppProcess {
    child: Mutex<Option<Child>>,
}

impl SystemAppProcess {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppProcess for SystemAppProcess {
    async fn spawn(&self, spec: &LaunchSpec) -> DeployResult<()> {
        let args = spec.args();
        let child = Command::new(&spec.binary)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeployError::Spawn {
                program: spec.binary.clone(),
                source,
            })?;

        tracing::info!(
            binary = %spec.binary,
            args = ?args,
            pid = ?child.id(),
            "Web application spawned"
        );

        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn try_wait(&self) -> DeployResult<Option<ExitStatus>> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => child
                .try_wait()
                .map_err(|e| DeployError::io("<child process>", e)),
            None => Ok(None),
        }
    }

    async fn stop(&self, timeout: Duration) -> DeployResult<()> {
        let mut guard = self.child.lock().await;

        if let Some(mut child) = guard.take()
            && let Some(pid) = child.id()
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(pid as i32);
            let _ = kill(pid, Signal::SIGTERM);

            tokio::select! {
                _ = child.wait() => {
                    tracing::info!("Web application stopped gracefully");
                }
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!("Graceful shutdown timeout, sending SIGKILL");
                    let _ = kill(pid, Signal::SIGKILL);
                    let _ = child.wait().await;
                }
            }
        }

        Ok(())
    }

    async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }
}

// ============================================================================
// Launcher
// ============================================================================

/// Web application status as reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Starts the web application, waits for its port, supervises until exit
pub struct Launcher {
    spec: LaunchSpec,
    process: Arc<dyn AppProcess>,
    pub status: Arc<RwLock<AppStatus>>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    poll_interval: Duration,
}

impl Launcher {
    pub fn new(config: &ServeConfig, process: Arc<dyn AppProcess>) -> Self {
        Self {
            spec: LaunchSpec::from_config(config),
            process,
            status: Arc::new(RwLock::new(AppStatus::Stopped)),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.graceful_shutdown_timeout_secs),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    async fn set_status(&self, status: AppStatus) {
        *self.status.write().await = status;
        crate::metrics::set_app_ready(status == AppStatus::Ready);
    }

    /// Spawn the process and block until its port accepts connections
    pub async fn start(&self) -> DeployResult<()> {
        self.set_status(AppStatus::Starting).await;

        if let Err(e) = self.process.spawn(&self.spec).await {
            self.set_status(AppStatus::Failed).await;
            return Err(e);
        }

        self.wait_for_ready().await
    }

    async fn wait_for_ready(&self) -> DeployResult<()> {
        let addr = self.spec.probe_addr();
        let deadline = tokio::time::Instant::now() + self.startup_timeout;

        tracing::info!(
            addr = %addr,
            timeout_secs = self.startup_timeout.as_secs(),
            "Waiting for web application"
        );

        loop {
            if let Some(status) = self.process.try_wait().await? {
                self.set_status(AppStatus::Failed).await;
                return Err(DeployError::AppExited(status));
            }

            let probe =
                tokio::time::timeout(self.poll_interval, TcpStream::connect(addr.as_str())).await;
            if let Ok(Ok(_)) = probe {
                self.set_status(AppStatus::Ready).await;
                tracing::info!(addr = %addr, pid = ?self.process.pid().await, "Web application ready");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::error!(addr = %addr, "Web application did not become ready in time");
                self.process.stop(self.shutdown_timeout).await?;
                self.set_status(AppStatus::Failed).await;
                return Err(DeployError::StartupTimeout {
                    addr,
                    timeout_secs: self.startup_timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Start the process and supervise it, honouring `shutdown` during startup too
    pub async fn run<F>(&self, shutdown: F) -> DeployResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            started = self.start() => started?,
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested while waiting for web application");
                return self.stop().await;
            }
        }

        self.supervise(shutdown).await
    }

    /// Stop the process gracefully and mark it stopped
    pub async fn stop(&self) -> DeployResult<()> {
        tracing::info!("Stopping web application");
        self.set_status(AppStatus::Stopping).await;
        self.process.stop(self.shutdown_timeout).await?;
        self.set_status(AppStatus::Stopped).await;
        Ok(())
    }

    /// Run until the process exits or `shutdown` resolves
    ///
    /// A clean exit or a requested shutdown returns Ok. A non-zero exit is an error.
    pub async fn supervise<F>(&self, shutdown: F) -> DeployResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    return self.stop().await;
                }
                _ = ticker.tick() => {
                    if let Some(status) = self.process.try_wait().await? {
                        if status.success() {
                            tracing::info!("Web application exited");
                            self.set_status(AppStatus::Stopped).await;
                            return Ok(());
                        }
                        tracing::error!(status = %status, "Web application exited unexpectedly");
                        self.set_status(AppStatus::Failed).await;
                        return Err(DeployError::AppExited(status));
                    }
                }
            }
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    /// Process stand-in whose exit code can be set from the test
    #[derive(Default)]
    pub struct MockAppProcess {
        pub spawned: RwLock<Option<LaunchSpec>>,
        pub exit_code: RwLock<Option<i32>>,
        pub stopped: RwLock<bool>,
        pub fail_spawn: bool,
    }

    impl MockAppProcess {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn exit_with(&self, code: i32) {
            *self.exit_code.write().await = Some(code);
        }
    }

    #[async_trait]
    impl AppProcess for MockAppProcess {
        async fn spawn(&self, spec: &LaunchSpec) -> DeployResult<()> {
            if self.fail_spawn {
                return Err(DeployError::Spawn {
                    program: spec.binary.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            *self.spawned.write().await = Some(spec.clone());
            Ok(())
        }

        async fn try_wait(&self) -> DeployResult<Option<ExitStatus>> {
            // Raw wait status: exit code lives in the high byte
            Ok(self
                .exit_code
                .read()
                .await
                .map(|code| ExitStatus::from_raw(code << 8)))
        }

        async fn stop(&self, _timeout: Duration) -> DeployResult<()> {
            *self.stopped.write().await = true;
            Ok(())
        }

        async fn pid(&self) -> Option<u32> {
            self.spawned.read().await.as_ref().map(|_| 4242)
        }
    }
}
