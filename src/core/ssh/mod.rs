//! Remote execution on host groups.

mod client;

pub use client::{
    execute_local_command, is_local_host, spawn_local_command_detached, CommandOutput, SshClient,
};

use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::runner::CommandRunner;
use crate::settings::HostGroup;

/// Output of a remote command on one host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOutput {
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
}

/// Run `command` on every host of `group`, one host at a time.
///
/// Stops at the first host where the command fails.
pub fn run_on_group(
    runner: &dyn CommandRunner,
    group: &HostGroup,
    identity_file: Option<&str>,
    command: &str,
) -> Result<Vec<HostOutput>> {
    let mut outputs = Vec::with_capacity(group.hosts.len());

    for host in &group.hosts {
        log_status!("remote", "[{}] {}: {}", group.name, host, command);
        let output = runner.run_remote(group, host, identity_file, command)?;

        if !output.success {
            return Err(Error::remote_command_failed(CommandFailedDetails {
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                dir: None,
                host: Some(host.clone()),
            }));
        }

        outputs.push(HostOutput {
            host: host.clone(),
            stdout: output.stdout.trim().to_string(),
        });
    }

    Ok(outputs)
}
