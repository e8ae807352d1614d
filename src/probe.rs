/// Host reachability probes.
///
/// `PingProbe` sends a single ICMP echo through the system `ping` binary.
/// A lost reply, a non-zero exit, or a probe that outlives its timeout all
/// count as "unreachable"; only failing to run `ping` at all is an error.
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Errors a probe may raise. Ordinary unreachability is `Ok(false)`, not an error.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to spawn probe command {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("I/O error waiting for probe command {command}: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
}

/// Answers whether a host is currently reachable.
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, host: &str, cancel: &CancellationToken) -> Result<bool, ProbeError>;
}

/// ICMP probe backed by the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    command: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

/// Build the `ping` arguments: one echo, numeric output, reply deadline in whole seconds.
fn build_args(host: &str, timeout: Duration) -> Vec<String> {
    // iputils only accepts whole seconds for -W; our own timeout enforces the real bound.
    let wait_secs = timeout.as_millis().div_ceil(1000).max(1);
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-n".to_string(),
        "-W".to_string(),
        wait_secs.to_string(),
        host.to_string(),
    ]
}

#[async_trait]
impl HealthProbe for PingProbe {
    async fn is_healthy(&self, host: &str, cancel: &CancellationToken) -> Result<bool, ProbeError> {
        let mut child = Command::new(&self.command)
            .args(build_args(host, self.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(host, "probe cancelled");
                Ok(false)
            }
            _ = tokio::time::sleep(self.timeout) => {
                tracing::debug!(host, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                Ok(false)
            }
            status = child.wait() => {
                let status = status.map_err(|e| ProbeError::Io {
                    command: self.command.clone(),
                    source: e,
                })?;
                Ok(status.success())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_rounds_timeout_up_to_seconds() {
        let args = build_args("10.8.0.1", Duration::from_millis(500));
        assert_eq!(args, vec!["-c", "1", "-n", "-W", "1", "10.8.0.1"]);

        let args = build_args("example.com", Duration::from_millis(2500));
        assert_eq!(args, vec!["-c", "1", "-n", "-W", "3", "example.com"]);
    }

    #[tokio::test]
    async fn test_successful_command_is_healthy() {
        let probe = PingProbe::new("true", Duration::from_secs(5));
        let healthy = probe
            .is_healthy("1.2.3.4", &CancellationToken::new())
            .await
            .unwrap();
        assert!(healthy);
    }

    #[tokio::test]
    async fn test_failing_command_is_unhealthy_not_error() {
        let probe = PingProbe::new("false", Duration::from_secs(5));
        let healthy = probe
            .is_healthy("1.2.3.4", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!healthy);
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let probe = PingProbe::new("nonexistent-ping-xyz", Duration::from_secs(5));
        let err = probe
            .is_healthy("1.2.3.4", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
        assert!(err.to_string().contains("nonexistent-ping-xyz"));
    }

    #[tokio::test]
    async fn test_cancelled_probe_returns_promptly() {
        let probe = PingProbe::new("sleep", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = std::time::Instant::now();
        let healthy = probe.is_healthy("1.2.3.4", &cancel).await.unwrap();
        assert!(!healthy);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
