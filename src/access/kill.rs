use super::{AccessController, AccessError};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// The kernel stores at most 15 bytes of a command name in `/proc/<pid>/comm`.
const COMM_LEN: usize = 15;

/// Cuts off access by terminating matching processes with SIGKILL.
///
/// Nothing is restarted on recovery, so `enable` is a no-op.
#[derive(Debug, Clone)]
pub struct KillController {
    proc_root: PathBuf,
}

impl KillController {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

/// Truncate a process name the way the kernel does for `comm`.
fn comm_name(name: &str) -> &str {
    if name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Find the pids under `proc_root` whose `comm` matches `name`, skipping ourselves.
pub fn find_pids(proc_root: &Path, name: &str) -> Result<Vec<i32>, AccessError> {
    let wanted = comm_name(name);
    let own_pid = std::process::id() as i32;

    let entries = std::fs::read_dir(proc_root).map_err(|e| AccessError::ProcessTable {
        path: proc_root.to_path_buf(),
        source: e,
    })?;

    let mut pids = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<i32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        // Processes can exit between read_dir and here; a missing comm is not an error.
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        if comm.trim_end_matches('\n') == wanted {
            pids.push(pid);
        }
    }
    pids.sort_unstable();
    Ok(pids)
}

/// Run `find_pids` on the blocking pool; a full `/proc` walk does a read per process.
async fn scan_pids(proc_root: &Path, name: &str) -> Result<Vec<i32>, AccessError> {
    let root = proc_root.to_path_buf();
    let wanted = name.to_string();
    tokio::task::spawn_blocking(move || find_pids(&root, &wanted))
        .await
        .map_err(|e| AccessError::ProcessTable {
            path: proc_root.to_path_buf(),
            source: std::io::Error::other(e),
        })?
}

fn kill_process(name: &str, pid: i32) {
    tracing::info!(process = name, pid, "killing process");
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => tracing::info!(process = name, pid, "killed process"),
        Err(Errno::ESRCH) => {
            tracing::warn!(process = name, pid, "cannot kill process because it already exited")
        }
        Err(e) => tracing::warn!(
            process = name,
            pid,
            error = %e,
            "cannot kill process"
        ),
    }
}

#[async_trait]
impl AccessController for KillController {
    fn name(&self) -> &str {
        "kill"
    }

    async fn enable(&self, _processes: &[String], _cancel: &CancellationToken) -> Result<(), AccessError> {
        // Killed processes are not restarted here
        Ok(())
    }

    async fn disable(&self, processes: &[String], cancel: &CancellationToken) -> Result<(), AccessError> {
        for process in processes {
            if cancel.is_cancelled() {
                return Err(AccessError::Cancelled {
                    process: process.clone(),
                });
            }
            let pids = scan_pids(&self.proc_root, process).await?;
            if pids.is_empty() {
                tracing::debug!(process = %process, "no running process to kill");
            }
            for pid in pids {
                kill_process(process, pid);
            }
        }
        Ok(())
    }
}
