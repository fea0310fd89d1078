use crate::{
    lldb::{AttachScript, Debugger, Script, Transcript},
    patch::{Addresses, Patch},
    Error, Process,
};
use eyre::{eyre, Context, Result};
use std::path::Path;

/// Everything needed to patch one process.
///
/// Addresses resolved by a session only mean anything to that session's
/// process, so they live and die with it.
pub struct Session<'a, D: Debugger> {
    process: Process,
    debugger: &'a mut D,
    /// Library to force-load before resolving anything.
    plugin: &'a Path,
    patches: &'a [Patch],
    addresses: Addresses,
}

impl<'a, D: Debugger> Session<'a, D> {
    /// Prepare to apply `patches` to `process`.
    pub fn new(
        process: Process,
        debugger: &'a mut D,
        plugin: &'a Path,
        patches: &'a [Patch],
    ) -> Self {
        Self {
            process,
            debugger,
            plugin,
            patches,
            addresses: Addresses::new(),
        }
    }

    /// Resolve every address the patches need, then write them all.
    pub fn patch(mut self) -> Result<()> {
        self.resolve()
            .wrap_err(format!("failed to resolve methods in process {}", self.process))?;
        self.apply()
            .wrap_err(format!("failed to write patches into process {}", self.process))?;
        log::info!("Patched process with PID {}", self.process);
        Ok(())
    }

    /// Load the plugin into the target and look up the address of every
    /// method the patches touch.
    fn resolve(&mut self) -> Result<()> {
        let patches = self.patches;
        let mut methods = Vec::new();
        for method in patches.iter().flat_map(Patch::methods) {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        let script = methods
            .iter()
            .fold(
                AttachScript::attach(&self.process).load_library(self.plugin),
                |script, method| script.evaluate(&method.lookup_expression()),
            )
            .detach();
        let transcript = self.run(&script)?;

        match transcript.values("void *")?.as_slice() {
            [0] => {
                return Err(eyre!(
                    "dlopen of {} returned NULL",
                    self.plugin.display()
                ))
            }
            [handle] => log::debug!("Loaded {}, handle = {handle:#x}", self.plugin.display()),
            other => return Err(eyre!("expected one dlopen result, lldb printed {other:x?}")),
        }

        let values = transcript.values("unsigned long long")?;
        if values.len() != methods.len() {
            return Err(eyre!(
                "asked lldb for {} method addresses, got {}",
                methods.len(),
                values.len()
            ));
        }
        for (method, address) in methods.into_iter().zip(values) {
            if address == 0 {
                return Err(eyre!("{method} is not known to the Objective-C runtime"));
            }
            log::debug!("Resolved {method} to {address:#x}");
            self.addresses.insert(method.clone(), address);
        }
        Ok(())
    }

    /// Write every patch into the target.
    fn apply(&mut self) -> Result<()> {
        let writes = self
            .patches
            .iter()
            .map(|patch| patch.assemble(&self.addresses))
            .collect::<Result<Vec<_>>>()?;
        let script = writes
            .iter()
            .fold(AttachScript::attach(&self.process), AttachScript::write)
            .detach();
        self.run(&script)?;
        Ok(())
    }

    /// Run a script against the target.
    ///
    /// Errors the debugger reports are this process's problem. A debugger that
    /// falls over without saying why is everyone's problem, and comes back as
    /// [`Error::DebuggerFailed`].
    fn run(&mut self, script: &Script) -> Result<Transcript> {
        let transcript = self
            .debugger
            .run(script)
            .wrap_err("failed to run lldb")?;
        transcript.check()?;
        if !transcript.success() {
            return Err(Error::DebuggerFailed {
                code: transcript.code.unwrap_or(1),
            }
            .into());
        }
        Ok(transcript)
    }
}
