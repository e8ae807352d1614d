/// Owns the configuration and at most one running watchdog.
use crate::access::{self, AccessController};
use crate::config::{ConfigError, WatchdogConfig};
use crate::probe::{HealthProbe, PingProbe};
use crate::watchdog::{Watchdog, WatchdogError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Errors returned by [`WatchdogManager::start`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("watchdog manager already started, call stop() first")]
    AlreadyStarted,
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Watchdog(#[from] WatchdogError),
}

pub struct WatchdogManager {
    config: WatchdogConfig,
    probe: Option<Arc<dyn HealthProbe>>,
    controller: Option<Arc<dyn AccessController>>,
    cancel: CancellationToken,
    running: Option<(Watchdog, CancellationToken)>,
}

impl WatchdogManager {
    /// Manager that builds a `PingProbe` and the configured access controller on start.
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            probe: None,
            controller: None,
            cancel: CancellationToken::new(),
            running: None,
        }
    }

    /// Manager with explicitly supplied capabilities instead of the configured ones.
    #[allow(dead_code)]
    pub fn with_components(
        config: WatchdogConfig,
        probe: Arc<dyn HealthProbe>,
        controller: Arc<dyn AccessController>,
    ) -> Self {
        Self {
            config,
            probe: Some(probe),
            controller: Some(controller),
            cancel: CancellationToken::new(),
            running: None,
        }
    }

    #[allow(dead_code)]
    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// Validate the configuration, then build and start a watchdog.
    pub fn start(&mut self) -> Result<(), ManagerError> {
        if self.running.is_some() {
            return Err(ManagerError::AlreadyStarted);
        }

        let settings = match self.config.validate() {
            Ok(settings) => Arc::new(settings),
            Err(e) => {
                if let ConfigError::Invalid {
                    field,
                    value,
                    reason,
                } = &e
                {
                    tracing::error!(field = %field, value = %value, reason, "invalid setting");
                }
                return Err(e.into());
            }
        };

        let probe = self.probe.clone().unwrap_or_else(|| {
            Arc::new(PingProbe::new(
                settings.probe_command.clone(),
                settings.probe_timeout,
            ))
        });
        let controller = self
            .controller
            .clone()
            .unwrap_or_else(|| access::from_config(&settings.access));

        let scope = self.cancel.child_token();
        let mut watchdog = Watchdog::new(settings, probe, controller);
        watchdog.start(scope.clone())?;
        self.running = Some((watchdog, scope));
        Ok(())
    }

    /// Cancel and drain the running watchdog. No-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some((mut watchdog, scope)) = self.running.take() else {
            return;
        };
        scope.cancel();
        watchdog.stop().await;
        tracing::info!("watchdog manager stopped");
    }

    /// Wait until the running watchdog ends on its own.
    ///
    /// Resolves immediately when nothing is running. Cancel-safe.
    pub async fn wait(&mut self) -> Result<(), WatchdogError> {
        match self.running.as_mut() {
            Some((watchdog, _)) => watchdog.wait().await,
            None => Ok(()),
        }
    }

    /// Stop, then release the manager's own cancellation scope.
    pub async fn shutdown(mut self) {
        self.stop().await;
        self.cancel.cancel();
    }
}

impl Drop for WatchdogManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
