//! Package installer with lock awareness and bounded retry

use crate::execution::{Cancellation, CommandExecutor, Connection, Scheduler};
use crate::remote::{is_locked, PackageState, RemoteCommand};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a package ended up usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Already present; its service was restarted
    AlreadyInstalled,
    /// Found half-installed and repaired
    Repaired,
    /// Freshly installed
    Installed,
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallOutcome::AlreadyInstalled => write!(f, "already installed"),
            InstallOutcome::Repaired => write!(f, "repaired"),
            InstallOutcome::Installed => write!(f, "installed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("installing {package} failed after {attempts} attempts: {last_error}")]
pub struct InstallError {
    pub package: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Ensures packages are installed on a node
#[derive(Clone)]
pub struct PackageInstaller {
    executor: CommandExecutor,
    scheduler: Arc<dyn Scheduler>,
    max_attempts: u32,
    lock_interval: Duration,
    cancellation: Cancellation,
}

impl PackageInstaller {
    pub fn new(
        executor: CommandExecutor,
        scheduler: Arc<dyn Scheduler>,
        max_attempts: u32,
        lock_interval: Duration,
    ) -> Self {
        Self {
            executor,
            scheduler,
            max_attempts: max_attempts.max(1),
            lock_interval,
            cancellation: Cancellation::new(),
        }
    }

    /// Stop retrying once `cancellation` fires
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Make sure `package` is installed.
    ///
    /// Each attempt waits out a held package lock, then inspects the package:
    /// an installed package only gets `service` restarted, a broken one is
    /// repaired, a missing one is installed. Nothing is installed when the
    /// package is already present.
    ///
    /// # Errors
    /// Returns `InstallError` once every attempt has failed.
    pub async fn ensure_installed(
        &self,
        connection: &Connection,
        package: &str,
        service: Option<&str>,
    ) -> Result<InstallOutcome, InstallError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if self.cancellation.is_cancelled() {
                warn!("Install of {} on {} cancelled", package, connection.address());
                return Err(InstallError {
                    package: package.to_string(),
                    attempts: attempt - 1,
                    last_error: "cancelled".to_string(),
                });
            }

            debug!(
                "Ensuring {} on {} (attempt {}/{})",
                package,
                connection.address(),
                attempt,
                self.max_attempts
            );

            match self.executor.execute(connection, &RemoteCommand::PackageLockStatus).await {
                Ok(output) if is_locked(&output) => {
                    info!("Package manager on {} is locked, waiting", connection.address());
                    last_error = "package manager is locked".to_string();
                    self.wait(attempt).await;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    last_error = e.to_string();
                    self.wait(attempt).await;
                    continue;
                }
            }

            let status = RemoteCommand::PackageStatus {
                package: package.to_string(),
            };
            let state = match self.executor.execute(connection, &status).await {
                Ok(output) => PackageState::parse(&output),
                Err(e) => {
                    last_error = e.to_string();
                    self.wait(attempt).await;
                    continue;
                }
            };

            match state {
                PackageState::Installed => {
                    info!("{} already installed on {}", package, connection.address());
                    self.restart(connection, service).await;
                    return Ok(InstallOutcome::AlreadyInstalled);
                }
                PackageState::Broken => {
                    warn!("{} is broken on {}, repairing", package, connection.address());
                    let repair = RemoteCommand::PackageRepair {
                        package: package.to_string(),
                    };
                    if let Err(e) = self.executor.execute(connection, &repair).await {
                        warn!("Repair of {} on {} reported: {}", package, connection.address(), e);
                    }
                    self.restart(connection, service).await;
                    return Ok(InstallOutcome::Repaired);
                }
                PackageState::NotInstalled => {
                    let install = RemoteCommand::PackageInstall {
                        package: package.to_string(),
                    };
                    match self.executor.execute(connection, &install).await {
                        Ok(_) => {
                            info!("Installed {} on {}", package, connection.address());
                            return Ok(InstallOutcome::Installed);
                        }
                        Err(e) => {
                            warn!("Installing {} on {} failed: {}", package, connection.address(), e);
                            last_error = e.to_string();
                        }
                    }
                }
            }

            self.wait(attempt).await;
        }

        Err(InstallError {
            package: package.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn wait(&self, attempt: u32) {
        if attempt < self.max_attempts {
            self.scheduler
                .sleep(self.cancellation.clamp(self.lock_interval))
                .await;
        }
    }

    async fn restart(&self, connection: &Connection, service: Option<&str>) {
        let Some(unit) = service else {
            return;
        };
        let restart = RemoteCommand::ServiceRestart {
            unit: unit.to_string(),
        };
        if let Err(e) = self.executor.execute(connection, &restart).await {
            warn!("Restarting {} on {} failed: {}", unit, connection.address(), e);
        }
    }
}
