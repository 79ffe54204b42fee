// src/system.rs

//! System package manager shims
//!
//! pygr delegates plain-name installs to the host package manager when it
//! advertises the package. The shims are thin adapters over the native
//! tools: probe availability with the query command, install and remove
//! with the obvious invocations (under sudo when not running as root).

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Supported system package managers, in detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPm {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    Apk,
}

/// Detection order; first binary found on PATH wins
const ALL: [SystemPm; 5] = [
    SystemPm::Apt,
    SystemPm::Dnf,
    SystemPm::Pacman,
    SystemPm::Zypper,
    SystemPm::Apk,
];

impl SystemPm {
    pub fn name(&self) -> &'static str {
        match self {
            SystemPm::Apt => "apt",
            SystemPm::Dnf => "dnf",
            SystemPm::Pacman => "pacman",
            SystemPm::Zypper => "zypper",
            SystemPm::Apk => "apk",
        }
    }

    /// The binary probed for on PATH
    fn binary(&self) -> &'static str {
        match self {
            SystemPm::Apt => "apt-get",
            SystemPm::Dnf => "dnf",
            SystemPm::Pacman => "pacman",
            SystemPm::Zypper => "zypper",
            SystemPm::Apk => "apk",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL.into_iter().find(|pm| pm.name() == name)
    }

    /// The host's package manager, if any
    pub fn detect() -> Option<Self> {
        ALL.into_iter().find(|pm| which(pm.binary()).is_some())
    }

    /// Whether the package manager knows this package
    pub fn available(&self, package: &str) -> Result<bool> {
        let (binary, args): (&str, Vec<&str>) = match self {
            SystemPm::Apt => ("apt-cache", vec!["show", package]),
            SystemPm::Dnf => ("dnf", vec!["info", package]),
            SystemPm::Pacman => ("pacman", vec!["-Si", package]),
            SystemPm::Zypper => ("zypper", vec!["--non-interactive", "info", package]),
            SystemPm::Apk => ("apk", vec!["info", "-e", package]),
        };
        let output = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::SystemPm(format!("cannot run {binary}: {e}")))?;
        debug!("{} query for '{package}': {}", self.name(), output);
        Ok(output.success())
    }

    /// Install a package through the native tool
    pub fn install(&self, package: &str) -> Result<()> {
        let args: Vec<&str> = match self {
            SystemPm::Apt => vec!["apt-get", "install", "-y", package],
            SystemPm::Dnf => vec!["dnf", "install", "-y", package],
            SystemPm::Pacman => vec!["pacman", "-S", "--noconfirm", package],
            SystemPm::Zypper => vec!["zypper", "--non-interactive", "install", package],
            SystemPm::Apk => vec!["apk", "add", package],
        };
        info!("installing '{package}' via {}", self.name());
        self.run_privileged(&args, package)
    }

    /// Remove a package through the native tool
    pub fn remove(&self, package: &str) -> Result<()> {
        let args: Vec<&str> = match self {
            SystemPm::Apt => vec!["apt-get", "remove", "-y", package],
            SystemPm::Dnf => vec!["dnf", "remove", "-y", package],
            SystemPm::Pacman => vec!["pacman", "-R", "--noconfirm", package],
            SystemPm::Zypper => vec!["zypper", "--non-interactive", "remove", package],
            SystemPm::Apk => vec!["apk", "del", package],
        };
        info!("removing '{package}' via {}", self.name());
        self.run_privileged(&args, package)
    }

    /// Run a mutating package-manager command, under sudo when not root
    fn run_privileged(&self, args: &[&str], package: &str) -> Result<()> {
        let mut command = if is_root() {
            let mut c = Command::new(args[0]);
            c.args(&args[1..]);
            c
        } else {
            let mut c = Command::new("sudo");
            c.args(args);
            c
        };
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::SystemPm(format!("cannot run {}: {e}", args[0])))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::SystemPm(format!(
                "{} failed for '{package}': {}",
                self.name(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Locate an executable on PATH
fn which(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for pm in ALL {
            assert_eq!(SystemPm::from_name(pm.name()), Some(pm));
        }
        assert_eq!(SystemPm::from_name("brew"), None);
    }

    #[test]
    fn test_detection_order_is_stable() {
        assert_eq!(ALL[0], SystemPm::Apt);
        assert_eq!(ALL.len(), 5);
    }

    #[test]
    fn test_which() {
        assert!(which("sh").is_some());
        assert!(which("no-such-binary-really").is_none());
    }
}
