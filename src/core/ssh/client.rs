use crate::error::{Error, Result};
use crate::settings::HostGroup;
use std::path::Path;
use std::process::{Command, Stdio};

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }
}

impl SshClient {
    /// Build a client for one host of a group. The identity file must exist if given.
    pub fn for_host(group: &HostGroup, host: &str, identity_file: Option<&str>) -> Result<Self> {
        let identity_file = match identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(
                        group.name.clone(),
                        expanded,
                    ));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", host);
        }

        Ok(Self {
            host: host.to_string(),
            user: group.user.clone(),
            port: group.port,
            identity_file,
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never prompt; a stalled connection fails instead of hanging the deploy.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }

    pub fn execute(&self, command: &str) -> CommandOutput {
        if self.is_local {
            return execute_local_command(command, None);
        }

        let args = self.build_ssh_args(command);

        match Command::new("ssh").args(&args).output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(-1, format!("SSH error: {}", e)),
        }
    }
}

fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

/// Run a shell command and capture its output.
pub fn execute_local_command(command: &str, current_dir: Option<&Path>) -> CommandOutput {
    let mut cmd = shell_command(command);

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::failed(-1, format!("Command error: {}", e)),
    }
}

/// Start a shell command without waiting for it. Returns the child pid.
///
/// Output is discarded and the child is never waited on.
pub fn spawn_local_command_detached(command: &str, current_dir: Option<&Path>) -> Result<u32> {
    let mut cmd = shell_command(command);

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("spawn {}", command))))?;

    Ok(child.id())
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(port: u16) -> HostGroup {
        HostGroup {
            name: "web".to_string(),
            hosts: vec!["web1".to_string()],
            user: "deploy".to_string(),
            port,
        }
    }

    #[test]
    fn ssh_args_include_identity_port_and_batch_mode() {
        let client = SshClient {
            host: "web1".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            identity_file: Some("/keys/id_rsa".to_string()),
            is_local: false,
        };

        let args = client.build_ssh_args("uptime");
        assert_eq!(&args[0..4], ["-i", "/keys/id_rsa", "-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@web1");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn default_port_is_omitted() {
        let client = SshClient::for_host(&group(22), "web1", None).unwrap();
        let args = client.build_ssh_args("uptime");
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn missing_identity_file_is_an_error() {
        let result = SshClient::for_host(&group(22), "web1", Some("/definitely/not/here"));
        assert!(result.is_err());
    }

    #[test]
    fn localhost_runs_locally() {
        let client = SshClient::for_host(&group(22), "localhost", None).unwrap();
        assert!(client.is_local);
        let output = client.execute("echo hello");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn local_command_reports_exit_code() {
        let output = execute_local_command("exit 3", None);
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn local_command_runs_under_sh() {
        let output = execute_local_command("for i in $(seq 1 3); do printf $i; done", None);
        assert!(output.success);
        assert_eq!(output.stdout, "123");
    }

    #[test]
    fn local_command_runs_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let output = execute_local_command("ls", Some(dir.path()));
        assert!(output.stdout.contains("marker.txt"));
    }
}
