use super::{AccessController, AccessError};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Comment prefix that tags the rules this controller owns.
const RULE_TAG: &str = "tunnel-watchdog";

/// Blocks outbound traffic with one iptables `OUTPUT` rule per process.
///
/// Each guarded application is expected to run under a group named after
/// it (e.g. `sg qbittorrent -c qbittorrent`), so the rule matches on
/// `--gid-owner <name>`. `iptables -C` is consulted before every change,
/// which keeps both directions idempotent. Every call passes `-w` so a
/// concurrent iptables user holding the xtables lock delays us instead of
/// failing the call.
#[derive(Debug, Clone)]
pub struct FirewallController {
    iptables: String,
}

impl FirewallController {
    pub fn new(iptables: impl Into<String>) -> Self {
        Self {
            iptables: iptables.into(),
        }
    }

    /// `iptables -C` exits 1 when the rule is missing; any other failure
    /// (lock contention, permissions, missing chain) is an error.
    async fn rule_exists(&self, process: &str, cancel: &CancellationToken) -> Result<bool, AccessError> {
        let args = rule_args("-C", process);
        let output = self.run(&args, process, cancel).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.command_failed(&args, output)),
        }
    }

    async fn change_rule(
        &self,
        action: &str,
        process: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AccessError> {
        let args = rule_args(action, process);
        let output = self.run(&args, process, cancel).await?;
        if !output.status.success() {
            return Err(self.command_failed(&args, output));
        }
        Ok(())
    }

    fn command_failed(&self, args: &[String], output: Output) -> AccessError {
        AccessError::CommandFailed {
            command: format!("{} {}", self.iptables, args.join(" ")),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    async fn run(
        &self,
        args: &[String],
        process: &str,
        cancel: &CancellationToken,
    ) -> Result<Output, AccessError> {
        let child = Command::new(&self.iptables)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AccessError::Spawn {
                command: self.iptables.clone(),
                source: e,
            })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AccessError::Cancelled {
                process: process.to_string(),
            }),
            output = child.wait_with_output() => output.map_err(|e| AccessError::Spawn {
                command: self.iptables.clone(),
                source: e,
            }),
        }
    }
}

/// Arguments for one rule operation (`-C`, `-I` or `-D`) on the `OUTPUT` chain.
fn rule_args(action: &str, process: &str) -> Vec<String> {
    vec![
        "-w".to_string(),
        action.to_string(),
        "OUTPUT".to_string(),
        "-m".to_string(),
        "owner".to_string(),
        "--gid-owner".to_string(),
        process.to_string(),
        "-m".to_string(),
        "comment".to_string(),
        "--comment".to_string(),
        format!("{RULE_TAG}:{process}"),
        "-j".to_string(),
        "REJECT".to_string(),
    ]
}

#[async_trait]
impl AccessController for FirewallController {
    fn name(&self) -> &str {
        "firewall"
    }

    async fn enable(&self, processes: &[String], cancel: &CancellationToken) -> Result<(), AccessError> {
        for process in processes {
            if self.rule_exists(process, cancel).await? {
                tracing::info!(process = %process, "removing firewall block");
                self.change_rule("-D", process, cancel).await?;
            }
        }
        Ok(())
    }

    async fn disable(&self, processes: &[String], cancel: &CancellationToken) -> Result<(), AccessError> {
        for process in processes {
            if self.rule_exists(process, cancel).await? {
                tracing::debug!(process = %process, "firewall block already present");
                continue;
            }
            tracing::info!(process = %process, "inserting firewall block");
            self.change_rule("-I", process, cancel).await?;
        }
        Ok(())
    }
}
