//! Process execution seam used by every deployment step.
//!
//! Steps never spawn processes themselves; they go through a [`CommandRunner`]
//! so the whole pipeline can be driven against a recording runner in tests.

use std::path::Path;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::settings::HostGroup;
use crate::ssh::{self, CommandOutput, SshClient};

pub trait CommandRunner {
    /// Run a shell command in `dir` and wait for it.
    fn run(&self, command: &str, dir: &Path) -> CommandOutput;

    /// Start a shell command in `dir` without waiting. Returns the pid.
    fn spawn_detached(&self, command: &str, dir: &Path) -> Result<u32>;

    /// Run a command on one host of a group.
    fn run_remote(
        &self,
        group: &HostGroup,
        host: &str,
        identity_file: Option<&str>,
        command: &str,
    ) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` locally and `ssh` remotely.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, dir: &Path) -> CommandOutput {
        ssh::execute_local_command(command, Some(dir))
    }

    fn spawn_detached(&self, command: &str, dir: &Path) -> Result<u32> {
        ssh::spawn_local_command_detached(command, Some(dir))
    }

    fn run_remote(
        &self,
        group: &HostGroup,
        host: &str,
        identity_file: Option<&str>,
        command: &str,
    ) -> Result<CommandOutput> {
        let client = SshClient::for_host(group, host, identity_file)?;
        Ok(client.execute(command))
    }
}

/// Run a command and return its trimmed stdout, failing on a non-zero exit.
pub fn run_checked(runner: &dyn CommandRunner, command: &str, dir: &Path) -> Result<String> {
    log_status!("run", "{} $ {}", dir.display(), command);
    let output = runner.run(command, dir);

    if !output.success {
        return Err(Error::local_command_failed(CommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.trim().to_string(),
            stderr: output.stderr.trim().to_string(),
            dir: Some(dir.display().to_string()),
            host: None,
        }));
    }

    Ok(output.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn run_checked_returns_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_checked(&ShellRunner, "echo '  hello  '", dir.path()).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn run_checked_fails_on_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_checked(&ShellRunner, "echo oops >&2; exit 4", dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::LocalCommandFailed);
        assert_eq!(err.details["exitCode"], 4);
        assert_eq!(err.details["stderr"], "oops");
    }

    #[test]
    fn spawn_detached_returns_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let pid = ShellRunner.spawn_detached("sleep 5", dir.path()).unwrap();
        assert!(pid > 0);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
