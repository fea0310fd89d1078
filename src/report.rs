use crate::Process;
use std::fmt::Display;

/// Which of the discovered processes ended up patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    discovered: Vec<Process>,
    patched: Vec<Process>,
}

impl Report {
    /// Start a report for `discovered`, none of which are patched yet.
    #[must_use]
    pub const fn new(discovered: Vec<Process>) -> Self {
        Self {
            discovered,
            patched: Vec::new(),
        }
    }

    /// Note that `process` was patched successfully.
    pub fn record_patched(&mut self, process: Process) {
        self.patched.push(process);
    }

    /// Every process that was found.
    #[must_use]
    pub fn discovered(&self) -> &[Process] {
        &self.discovered
    }

    /// Every process that was patched, in the order it happened.
    #[must_use]
    pub fn patched(&self) -> &[Process] {
        &self.patched
    }

    /// Whether `process` was patched.
    #[must_use]
    pub fn is_patched(&self, process: Process) -> bool {
        self.patched.contains(&process)
    }

    /// Whether every process that was found got patched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.discovered.iter().all(|&process| self.is_patched(process))
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_complete() {
            return writeln!(
                f,
                "Success: {} QuickLook processes patched.",
                self.discovered.len()
            );
        }
        writeln!(f, "Failed to patch all QuickLook processes:")?;
        for &process in &self.discovered {
            // `Process` ignores width, so pad its string form instead.
            let pid = process.to_string();
            if self.is_patched(process) {
                writeln!(f, "  {pid:>7}: [ OK ] Patched")?;
            } else {
                writeln!(f, "  {pid:>7}: [FAIL] Failed to patch")?;
            }
        }
        Ok(())
    }
}
