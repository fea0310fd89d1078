use eyre::{eyre, Context, Result};
use std::{fmt::Display, process::Command};

const PGREP_PATH: &str = "/usr/bin/pgrep";

/// A running process to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Process(u32);

impl Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Process {
    /// Refer to a process by its PID.
    #[must_use]
    pub const fn from_pid(pid: u32) -> Self {
        Self(pid)
    }

    /// The process ID.
    #[must_use]
    pub const fn pid(self) -> u32 {
        self.0
    }

    /// Find every process whose executable name is exactly `name`, in the
    /// order `pgrep` lists them.
    ///
    /// An empty list means nothing by that name is running.
    pub fn all_by_name(name: &str) -> Result<Vec<Self>> {
        log::debug!("Searching for processes with executable name {}", name);
        let output = Command::new(PGREP_PATH)
            .args(["-x", name])
            .output()
            .wrap_err("failed to run pgrep to list processes")?;
        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let processes = Self::parse_pgrep(&stdout)?;
                for process in &processes {
                    log::info!("Found process with PID {}", process);
                }
                Ok(processes)
            }
            // pgrep's way of saying that nothing matched.
            Some(1) => {
                log::debug!("No process is named {}", name);
                Ok(Vec::new())
            }
            _ => Err(eyre!(
                "pgrep failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    /// Parse the whitespace-separated PIDs `pgrep` prints.
    fn parse_pgrep(stdout: &str) -> Result<Vec<Self>> {
        stdout
            .split_whitespace()
            .map(|pid| {
                log::trace!("Checking pgrep output {:?}", pid);
                pid.parse()
                    .map(Self)
                    .wrap_err(format!("pgrep printed {pid:?}, which is not a PID"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pgrep_output_in_order() {
        let processes = Process::parse_pgrep("812\n4410\n  97\n").unwrap();
        assert_eq!(
            processes,
            [
                Process::from_pid(812),
                Process::from_pid(4410),
                Process::from_pid(97)
            ]
        );
        assert_eq!(processes[1].to_string(), "4410");
    }

    #[test]
    fn empty_output_means_no_processes() {
        assert!(Process::parse_pgrep("").unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Process::parse_pgrep("812\nQuickLookUIService\n").is_err());
        assert!(Process::parse_pgrep("-3\n").is_err());
    }
}
