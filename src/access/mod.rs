pub mod firewall;
pub mod kill;

use crate::config::{AccessConfig, AccessStrategy};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use firewall::FirewallController;
pub use kill::KillController;

/// Errors produced by access controllers.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("failed to scan process table at {}: {source}", .path.display())]
    ProcessTable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cancelled while updating access for {process}")]
    Cancelled { process: String },
}

/// Grants or revokes network access for a set of processes.
///
/// Both operations are idempotent: enabling an already enabled process or
/// disabling an already disabled one is a no-op.
#[async_trait]
pub trait AccessController: Send + Sync {
    /// Human-readable controller name (e.g., "firewall", "kill").
    fn name(&self) -> &str;

    /// Restore network access for `processes`.
    async fn enable(
        &self,
        processes: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), AccessError>;

    /// Cut off network access for `processes`.
    async fn disable(
        &self,
        processes: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), AccessError>;
}

/// Build the controller selected by `access.strategy`.
pub fn from_config(config: &AccessConfig) -> Arc<dyn AccessController> {
    match config.strategy {
        AccessStrategy::Firewall => Arc::new(FirewallController::new(&config.iptables)),
        AccessStrategy::Kill => Arc::new(KillController::new(&config.proc_root)),
    }
}
