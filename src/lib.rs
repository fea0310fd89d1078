//! Take the rounded corners off QuickLook image previews by patching every
//! running `QuickLookUIService` in memory.
//!
//! # How it works
//!
//! Each process is attached to with LLDB, the Image display plugin is
//! force-loaded (QuickLook loads its plugins lazily, and `dlopen`ing one is
//! enough to register its classes with the Objective-C runtime), and then two
//! instructions are overwritten:
//!
//! - `-[IKImageContentView updateCornerRadius]` becomes a bare `ret`.
//! - `-[QLDisplayBundleViewController enableBorder]` becomes a `b` into
//!   `-[QLDisplayBundleViewController disableBorder]`.
//!
//! Nothing on disk is changed, so the patch only lasts as long as the
//! processes it was applied to. QuickLook processes started later are not
//! patched.
//!
//! # Example
//!
//! ```no_run
//! use fix_quicklook::{Fixer, Lldb, Process, SERVICE_NAME};
//!
//! # fn main() -> eyre::Result<()> {
//! let processes = Process::all_by_name(SERVICE_NAME)?;
//! let report = Fixer::new(Lldb::default())?.fix_all(&processes)?;
//! print!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! # Platform support
//!
//! Apple Silicon only, since the patches are AArch64 instructions. System
//! Integrity Protection has to be off: stopping one process from rewriting
//! another's code is exactly what it is for. See [`preflight`].
//!
//! This library uses [`log`][1] for logging.
//!
//!  [1]: https://crates.io/crates/log
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    // Errors can happen for such a diverse set of reasons out of the user's
    // control that listing them all in a form other than the variants of `Error`
    // would not be feasible or useful.
    clippy::missing_errors_doc,
)]
use eyre::Result;
use std::path::PathBuf;

pub use insn::Instruction;
pub use lldb::{AttachScript, Debugger, Lldb, Script, Transcript};
pub use patch::{Addresses, Patch, Write};
pub use process::Process;
pub use report::Report;
pub use session::Session;
pub use symbol::{MethodKind, ObjcMethod};

mod insn;
mod lldb;
mod patch;
pub mod preflight;
mod process;
mod report;
mod session;
mod symbol;

/// Executable name of the process that renders QuickLook previews.
pub const SERVICE_NAME: &str = "QuickLookUIService";

/// The QuickLook display plugin that defines the classes being patched.
pub const IMAGE_PLUGIN: &str = "/System/Library/Frameworks/QuickLookUI.framework/Versions/A/\
                                PlugIns/Image.qldisplay/Contents/MacOS/Image";

/// Conditions that end the whole run, rather than just one process's patch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The patches are machine code for another architecture.
    #[error("this tool only supports Apple Silicon (required arch: {required}, your arch: {found})")]
    UnsupportedArch {
        /// The architecture the patches are written for.
        required: &'static str,
        /// What `uname -m` reported.
        found: String,
    },
    /// System Integrity Protection forbids writing into other processes.
    #[error("this tool cannot work because SIP is enabled")]
    SipEnabled,
    /// There was nothing to patch.
    #[error("{name} is not running, so there is nothing to patch")]
    NotRunning {
        /// The executable name that was searched for.
        name: String,
    },
    /// The debugger itself failed, rather than reporting a problem with the
    /// process it was working on.
    #[error("lldb failed with code {code}")]
    DebuggerFailed {
        /// The debugger's exit code.
        code: i32,
    },
}

impl Error {
    /// Find the first [`Error`] anywhere in a report's chain of causes.
    #[must_use]
    pub fn find(report: &eyre::Report) -> Option<&Self> {
        report.chain().find_map(|cause| cause.downcast_ref::<Self>())
    }

    /// The exit code the whole program should finish with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DebuggerFailed { code } => *code,
            Self::UnsupportedArch { .. } | Self::SipEnabled | Self::NotRunning { .. } => 1,
        }
    }
}

/// Patches a list of processes one after another, using one debugger.
pub struct Fixer<D: Debugger> {
    debugger: D,
    plugin: PathBuf,
    patches: Vec<Patch>,
}

impl<D: Debugger> Fixer<D> {
    /// Prepare to apply the QuickLook patches using `debugger`.
    pub fn new(debugger: D) -> Result<Self> {
        Ok(Self {
            debugger,
            plugin: PathBuf::from(IMAGE_PLUGIN),
            patches: Patch::quicklook()?,
        })
    }

    /// Check the machine with `preflight`, find targets with `discover`, and
    /// patch them all.
    ///
    /// Nothing is searched for unless every precondition holds.
    pub fn run(
        &mut self,
        preflight: impl FnOnce() -> Result<()>,
        discover: impl FnOnce() -> Result<Vec<Process>>,
    ) -> Result<Report> {
        preflight()?;
        let processes = discover()?;
        if processes.len() > 1 {
            log::info!("Fixing {} QuickLook instances", processes.len());
        }
        self.fix_all(&processes)
    }

    /// Patch every process in `processes`, in order.
    ///
    /// A process that can't be patched is logged and left out of the report's
    /// patched list, and the rest are still attempted. Only a failure of the
    /// debugger itself stops the run early.
    pub fn fix_all(&mut self, processes: &[Process]) -> Result<Report> {
        if processes.is_empty() {
            return Err(Error::NotRunning {
                name: SERVICE_NAME.to_owned(),
            }
            .into());
        }
        let mut report = Report::new(processes.to_vec());
        for &process in processes {
            log::debug!("Patching process with PID {}", process);
            let session = Session::new(process, &mut self.debugger, &self.plugin, &self.patches);
            match session.patch() {
                Ok(()) => report.record_patched(process),
                Err(e) if matches!(Error::find(&e), Some(Error::DebuggerFailed { .. })) => {
                    return Err(e);
                }
                Err(e) => log::warn!("Failed to patch process with PID {process}: {e:?}"),
            }
        }
        Ok(report)
    }

    /// The debugger this is driving.
    pub fn debugger(&self) -> &D {
        &self.debugger
    }
}
