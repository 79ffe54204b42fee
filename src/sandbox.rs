// src/sandbox.rs

//! Sandboxed command execution for builds
//!
//! The sandbox is a policy record, not a process mode: callers describe the
//! constraints (network, writable paths, time limit) and this module
//! realizes them through the host sandbox tool (`firejail`) when available.
//! With the sandbox disabled the command runs directly under the host with
//! the provided environment.
//!
//! Commands run through `/bin/sh -c` with stdin nulled and output captured;
//! a non-zero exit surfaces `BuildFailed` with the captured output, and a
//! timeout kills the child and surfaces `BuildTimeout`.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default per-command time limit
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Constraints applied to build commands
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// Whether to isolate at all; when false, commands run on the host
    pub enabled: bool,
    /// Whether the sandboxed command may reach the network
    pub network: bool,
    /// Per-command time limit
    pub timeout: Duration,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            network: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SandboxPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Marker string contributing to the build fingerprint
    pub fn marker(&self) -> &'static str {
        if !self.enabled {
            "no-sandbox"
        } else if self.network {
            "network-on"
        } else {
            "sandbox"
        }
    }
}

/// Captured output of a completed command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands under the active policy
pub struct SandboxRunner {
    policy: SandboxPolicy,
    /// Resolved sandbox tool, probed once
    tool: Option<PathBuf>,
}

impl SandboxRunner {
    pub fn new(policy: SandboxPolicy) -> Self {
        let tool = if policy.enabled {
            let found = which("firejail");
            if found.is_none() {
                warn!("sandbox requested but firejail not found; commands run unsandboxed");
            }
            found
        } else {
            None
        };
        Self { policy, tool }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Run one shell command in `cwd`
    ///
    /// `writable_paths` are the only locations the sandboxed command may
    /// modify; the source and store stay read-only.
    pub fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
        writable_paths: &[PathBuf],
    ) -> Result<CommandOutput> {
        let mut invocation = match &self.tool {
            Some(tool) => {
                let mut c = Command::new(tool);
                c.arg("--quiet").arg("--noprofile").arg("--noroot");
                for path in writable_paths {
                    c.arg(format!("--whitelist={}", path.display()));
                }
                if !self.policy.network {
                    c.arg("--net=none");
                }
                c.arg("--").arg("/bin/sh").arg("-c").arg(command);
                c
            }
            None => {
                let mut c = Command::new("/bin/sh");
                c.arg("-c").arg(command);
                c
            }
        };

        debug!("running `{command}` in {}", cwd.display());
        let mut child = invocation
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::BuildFailed {
                command: command.to_string(),
                status: -1,
                stdout: String::new(),
                stderr: format!("failed to spawn: {e}"),
            })?;

        match child.wait_timeout(self.policy.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if status.success() {
                    Ok(CommandOutput { stdout, stderr })
                } else {
                    Err(Error::BuildFailed {
                        command: command.to_string(),
                        status: status.code().unwrap_or(-1),
                        stdout,
                        stderr,
                    })
                }
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::BuildTimeout {
                    command: command.to_string(),
                    seconds: self.policy.timeout.as_secs(),
                })
            }
        }
    }
}

/// Locate an executable on `PATH`
fn which(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
