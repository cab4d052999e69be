//! Scripted command executor (testing only)
//!
//! `ScriptedExecutor` never spawns a process. Each command maps to a
//! [`Script`] describing how it behaves, and every execution is recorded so
//! tests can assert which toolchain a command saw.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use toolchain_provisioner::ToolchainEnvironment;

use crate::error::ExecutionError;
use crate::runner::{CommandExecutor, CommandOutput};

/// How a scripted command behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    outcome: Outcome,
    delay: Duration,
    log: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Exit(Option<i32>),
    LaunchFailure(String),
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Self {
            outcome: Outcome::Exit(Some(code)),
            delay: Duration::ZERO,
            log: Vec::new(),
        }
    }

    pub fn passing() -> Self {
        Self::exit(0)
    }

    /// Terminated by a signal: no exit code.
    pub fn signal() -> Self {
        Self {
            outcome: Outcome::Exit(None),
            ..Self::passing()
        }
    }

    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::LaunchFailure(message.into()),
            ..Self::passing()
        }
    }

    /// Sleep before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: impl Into<Vec<u8>>) -> Self {
        self.log = log.into();
        self
    }
}

/// One recorded call to [`ScriptedExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub command: String,
    pub toolchain: String,
    pub vars: BTreeMap<String, String>,
    pub checkout: PathBuf,
}

/// Executor driven by per-command scripts.
#[derive(Debug)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    default: Script,
    executions: Mutex<Vec<Execution>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            scripts: HashMap::new(),
            default: Script::passing(),
            executions: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedExecutor {
    /// Every command passes immediately unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, command: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(command.into(), script);
        self
    }

    /// Behaviour for commands without their own script.
    pub fn with_default(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    /// Executions in the order they started.
    pub fn executions(&self) -> Vec<Execution> {
        self.executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether `command` was ever started.
    pub fn executed(&self, command: &str) -> bool {
        self.executions().iter().any(|e| e.command == command)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        command: &str,
        env: &ToolchainEnvironment,
        checkout: &Path,
    ) -> Result<CommandOutput, ExecutionError> {
        self.executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Execution {
                command: command.to_string(),
                toolchain: env.version().to_string(),
                vars: env.vars().clone(),
                checkout: checkout.to_path_buf(),
            });

        let script = self
            .scripts
            .get(command)
            .unwrap_or(&self.default)
            .clone();

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        match script.outcome {
            Outcome::Exit(exit_code) => Ok(CommandOutput {
                exit_code,
                log: script.log,
            }),
            Outcome::LaunchFailure(reason) => Err(ExecutionError::Launch {
                command: command.to_string(),
                reason,
                exit_code: None,
                log: script.log,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use toolchain_provisioner::fakes::MemoryToolchainSource;
    use toolchain_provisioner::{ToolchainProvisioner, VersionSelector};

    #[tokio::test]
    async fn test_scripts_and_records() {
        let provisioner = ToolchainProvisioner::new(Arc::new(
            MemoryToolchainSource::new().with_stable("1.80.1", ["rust"]),
        ));
        let env = provisioner
            .session()
            .provision("test", &VersionSelector::LatestStable, &BTreeSet::new())
            .await
            .unwrap();

        let executor = ScriptedExecutor::new()
            .with_script("cargo test", Script::exit(101).with_log("boom"))
            .with_script("cargo doc", Script::launch_failure("no cargo"));

        let output = executor
            .execute("cargo test", &env, Path::new("/src"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(101));
        assert_eq!(output.log, b"boom");

        let ok = executor
            .execute("cargo build", &env, Path::new("/src"))
            .await
            .unwrap();
        assert!(ok.success());

        let err = executor
            .execute("cargo doc", &env, Path::new("/src"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));

        let executions = executor.executions();
        assert_eq!(executions.len(), 3);
        assert_eq!(executions[0].toolchain, "1.80.1");
        assert_eq!(executions[0].checkout, PathBuf::from("/src"));
        assert!(executor.executed("cargo build"));
        assert!(!executor.executed("cargo fmt"));
    }
}
