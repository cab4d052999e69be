//! Job command execution.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use toolchain_provisioner::ToolchainEnvironment;
use tracing::{debug, warn};

use crate::error::ExecutionError;

/// Exit codes the shell uses for "not found" and "not executable".
const SHELL_LAUNCH_FAILURES: [i32; 2] = [126, 127];

/// Output of a command that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout followed by stderr.
    pub log: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a job command inside a provisioned environment.
///
/// The checkout is shared by every job in a run and must be treated as
/// read-only by implementations.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        env: &ToolchainEnvironment,
        checkout: &Path,
    ) -> Result<CommandOutput, ExecutionError>;
}

/// Executes commands with `sh -c`.
///
/// Each command runs as the leader of its own process group. When the
/// execution future finishes or is dropped (timeout, cancellation) the whole
/// group is killed, so nothing the command started outlives the job or keeps
/// writing into its scratch directory.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        env: &ToolchainEnvironment,
        checkout: &Path,
    ) -> Result<CommandOutput, ExecutionError> {
        debug!(job = %env.job_name(), toolchain = %env.version(), %command, "spawning");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(checkout)
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ExecutionError::launch(command, e.to_string()))?;
        let _group = ProcessGroup::new(child.id());

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutionError::launch(command, e.to_string()))?;

        let exit_code = output.status.code();
        let mut log = output.stdout;
        log.extend_from_slice(&output.stderr);

        if let Some(code) = exit_code.filter(|c| SHELL_LAUNCH_FAILURES.contains(c)) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::Launch {
                command: command.to_string(),
                reason: format!("shell exited with {code}: {}", stderr.trim()),
                exit_code,
                log,
            });
        }

        Ok(CommandOutput { exit_code, log })
    }
}

/// Kills a command's process group when dropped.
///
/// Runs on every exit path: normal completion reaps stragglers the command
/// left in the background, and a dropped execution future takes its whole
/// process tree down with it.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) => debug!(pgid, "killed process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid, error = %e, "failed to kill process group"),
        }
    }
}
