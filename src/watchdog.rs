/// Outage watchdog: polls a host and cuts off access for the watched
/// processes while it is down.
///
/// A `Watchdog` moves through three phases. It is built `Idle`, `start()`
/// hands its state to a background tokio task (`Running`), and `stop()`
/// cancels and joins that task (`Stopped`, terminal). The outage counter is
/// only ever touched by whoever owns the `Monitor`, so it needs no locking.
use crate::access::{AccessController, AccessError};
use crate::config::Settings;
use crate::outage::{OutageState, Transition};
use crate::probe::HealthProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the watchdog.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("watchdog already running, call stop() first")]
    AlreadyRunning,
    #[error("watchdog has stopped and cannot be restarted")]
    Stopped,
    #[error("access controller {controller} failed: {source}")]
    Access {
        controller: String,
        source: AccessError,
    },
    #[error("watchdog loop panicked: {0}")]
    Panicked(String),
}

/// Per-instance polling state, owned by exactly one task at a time.
pub struct Monitor {
    settings: Arc<Settings>,
    probe: Arc<dyn HealthProbe>,
    controller: Arc<dyn AccessController>,
    state: OutageState,
}

impl Monitor {
    pub fn new(
        settings: Arc<Settings>,
        probe: Arc<dyn HealthProbe>,
        controller: Arc<dyn AccessController>,
    ) -> Self {
        let state = OutageState::new(settings.outage_threshold);
        Self {
            settings,
            probe,
            controller,
            state,
        }
    }

    /// Probe once, update the outage counter, and fire the access controller on an edge.
    ///
    /// Probe errors count as an unhealthy check. Access controller errors are
    /// returned; they end the loop.
    pub async fn check_once(&mut self, cancel: &CancellationToken) -> Result<bool, WatchdogError> {
        let host = self.settings.host.as_str();
        tracing::debug!(host, "checking host");

        let healthy = match self.probe.is_healthy(host, cancel).await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::debug!(host, error = %e, "probe failed, counting as down");
                false
            }
        };

        let transition = self.state.record(healthy);
        tracing::debug!(
            host,
            healthy,
            consecutive_failures = self.state.consecutive_failures(),
            "check complete"
        );

        let processes = &self.settings.watched_processes;
        let result = match transition {
            Transition::None => Ok(()),
            Transition::OutageStarted => {
                tracing::warn!(
                    host,
                    consecutive_failures = self.state.consecutive_failures(),
                    processes = ?processes,
                    "host is down, cutting off access"
                );
                self.controller.disable(processes, cancel).await
            }
            Transition::Recovered => {
                tracing::info!(host, processes = ?processes, "host is back up, restoring access");
                self.controller.enable(processes, cancel).await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                controller = self.controller.name(),
                error = %e,
                "access controller failed, stopping watchdog"
            );
            return Err(WatchdogError::Access {
                controller: self.controller.name().to_string(),
                source: e,
            });
        }

        Ok(healthy)
    }

    /// Delay before the next check, based on the outcome of the last one.
    pub fn next_delay(&self, healthy: bool) -> Duration {
        if healthy {
            self.settings.healthy_interval
        } else {
            self.settings.unhealthy_interval
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> &OutageState {
        &self.state
    }

    /// Poll until `cancel` fires or the access controller fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatchdogError> {
        tracing::info!(
            host = %self.settings.host,
            controller = self.controller.name(),
            threshold = self.settings.outage_threshold,
            "watchdog started"
        );

        while !cancel.is_cancelled() {
            let healthy = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.check_once(&cancel) => result?,
            };

            let delay = self.next_delay(healthy);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(host = %self.settings.host, "watchdog stopped");
        Ok(())
    }
}

enum Phase {
    Idle(Monitor),
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<Result<(), WatchdogError>>,
    },
    Stopped,
}

/// Handle to one watchdog loop.
pub struct Watchdog {
    phase: Phase,
    drain_timeout: Duration,
}

impl Watchdog {
    pub fn new(
        settings: Arc<Settings>,
        probe: Arc<dyn HealthProbe>,
        controller: Arc<dyn AccessController>,
    ) -> Self {
        let drain_timeout = settings.drain_timeout;
        Self {
            phase: Phase::Idle(Monitor::new(settings, probe, controller)),
            drain_timeout,
        }
    }

    /// Spawn the polling loop bound to `cancel` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, cancel: CancellationToken) -> Result<(), WatchdogError> {
        match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Idle(monitor) => {
                let handle = tokio::spawn(monitor.run(cancel.clone()));
                self.phase = Phase::Running { cancel, handle };
                Ok(())
            }
            running @ Phase::Running { .. } => {
                self.phase = running;
                Err(WatchdogError::AlreadyRunning)
            }
            Phase::Stopped => Err(WatchdogError::Stopped),
        }
    }

    /// Run a single check outside the loop. Only valid before `start()`.
    #[allow(dead_code)]
    pub async fn check_once(&mut self, cancel: &CancellationToken) -> Result<bool, WatchdogError> {
        match &mut self.phase {
            Phase::Idle(monitor) => monitor.check_once(cancel).await,
            Phase::Running { .. } => Err(WatchdogError::AlreadyRunning),
            Phase::Stopped => Err(WatchdogError::Stopped),
        }
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        matches!(&self.phase, Phase::Running { handle, .. } if !handle.is_finished())
    }

    #[allow(dead_code)]
    pub fn is_stopped(&self) -> bool {
        matches!(self.phase, Phase::Stopped)
    }

    /// Wait for the loop to end on its own, returning its fault if it had one.
    ///
    /// Cancel-safe: dropping this future leaves the loop running.
    pub async fn wait(&mut self) -> Result<(), WatchdogError> {
        let Phase::Running { handle, .. } = &mut self.phase else {
            return Ok(());
        };
        let joined = handle.await;
        self.phase = Phase::Stopped;
        match joined {
            Ok(result) => result,
            Err(e) => Err(WatchdogError::Panicked(e.to_string())),
        }
    }

    /// Cancel the loop and wait for it to finish, swallowing any fault.
    ///
    /// The wait is bounded by the drain timeout; past it the task is aborted.
    pub async fn stop(&mut self) {
        let Phase::Running { cancel, mut handle } =
            std::mem::replace(&mut self.phase, Phase::Stopped)
        else {
            return;
        };
        cancel.cancel();

        match tokio::time::timeout(self.drain_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!(error = %e, "watchdog had already faulted"),
            Ok(Err(e)) => tracing::debug!(error = %e, "watchdog task did not finish cleanly"),
            Err(_) => {
                tracing::warn!(
                    drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                    "watchdog did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Can't join here; make sure the loop at least winds down.
        if let Phase::Running { cancel, .. } = &self.phase {
            cancel.cancel();
        }
    }
}
