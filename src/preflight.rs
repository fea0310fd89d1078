//! Checks that the machine is one this tool can work on at all.
use crate::Error;
use eyre::{eyre, Context, Result};
use std::process::Command;

/// The only architecture the instruction patches are written for.
pub const REQUIRED_ARCH: &str = "arm64";

const UNAME_PATH: &str = "/usr/bin/uname";
const CSRUTIL_PATH: &str = "/usr/bin/csrutil";

/// What `csrutil status` says about System Integrity Protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipStatus {
    /// Nothing can write into system processes.
    Enabled,
    /// Debuggers are free to attach.
    Disabled,
    /// Some other answer, such as a custom configuration.
    Unknown,
}

impl SipStatus {
    /// Interpret the output of `csrutil status`.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "System Integrity Protection status: enabled." => Self::Enabled,
            "System Integrity Protection status: disabled." => Self::Disabled,
            _ => Self::Unknown,
        }
    }

    /// Ask `csrutil`. If it can't be run, the answer is [`SipStatus::Unknown`].
    #[must_use]
    pub fn query() -> Self {
        match command_output(CSRUTIL_PATH, &["status"]) {
            Ok(status) => {
                log::debug!("csrutil says {status:?}");
                Self::parse(&status)
            }
            Err(e) => {
                log::debug!("Couldn't run csrutil: {e:?}");
                Self::Unknown
            }
        }
    }
}

/// Fail unless `arch` is the one the patches are written for.
pub fn check_arch(arch: &str) -> Result<()> {
    let arch = arch.trim();
    if arch == REQUIRED_ARCH {
        Ok(())
    } else {
        Err(Error::UnsupportedArch {
            required: REQUIRED_ARCH,
            found: arch.to_owned(),
        }
        .into())
    }
}

/// Fail if SIP would stop us writing to the target. An unreadable status only
/// warrants a warning.
pub fn check_sip(status: SipStatus) -> Result<()> {
    match status {
        SipStatus::Enabled => Err(Error::SipEnabled.into()),
        SipStatus::Disabled => Ok(()),
        SipStatus::Unknown => {
            log::warn!("Unable to determine whether SIP is enabled, trying anyway");
            Ok(())
        }
    }
}

/// Warn when not running as root, since attaching is likely to be refused.
pub fn check_privileges() {
    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root, attaching to QuickLook may fail");
    }
}

/// Run every check against the live system, in order.
pub fn check() -> Result<()> {
    let arch = command_output(UNAME_PATH, &["-m"]).wrap_err("failed to read the architecture")?;
    check_arch(&arch)?;
    check_sip(SipStatus::query())?;
    check_privileges();
    log::debug!("Preflight checks passed");
    Ok(())
}

fn command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .wrap_err(format!("failed to run {program}"))?;
    if !output.status.success() {
        return Err(eyre!("{program} exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
