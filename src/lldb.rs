//! Driving LLDB from the outside.
//!
//! Every interaction with a target is one batch-mode LLDB run: a list of
//! commands is piped into `lldb --batch`, and what it prints is collected into
//! a [`Transcript`] for the caller to pick apart.
use crate::{patch::Write, Process};
use eyre::{eyre, Context, Result};
use regex::Regex;
use std::{
    fmt::Display,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

const LLDB_PATH: &str = "/usr/bin/lldb";

/// `RTLD_NOW` from `<dlfcn.h>`.
const RTLD_NOW: u32 = 2;

/// Something that can run a debugger [`Script`] to completion.
pub trait Debugger {
    /// Run every command in `script`, returning everything the debugger said.
    fn run(&mut self, script: &Script) -> Result<Transcript>;
}

/// A list of debugger commands, run in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script(Vec<String>);

impl Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for command in &self.0 {
            writeln!(f, "{command}")?;
        }
        Ok(())
    }
}

impl Script {
    /// The commands, in order.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.0
    }

    fn push(&mut self, command: impl Into<String>) {
        self.0.push(command.into());
    }
}

/// A [`Script`] under construction which is attached to a single process.
///
/// The only way to get a runnable script out of this is [`AttachScript::detach`],
/// so the process is always released at the end, whatever happened in between.
#[derive(Debug)]
#[must_use = "an attach script does nothing until it is detached and run"]
pub struct AttachScript(Script);

impl AttachScript {
    /// Start a script that attaches to `process`.
    pub fn attach(process: &Process) -> Self {
        let mut script = Script::default();
        // Keep going after a failed command so that the detach still happens.
        script.push("settings set interpreter.stop-command-source-on-error false");
        script.push(format!("process attach --pid {process}"));
        Self(script)
    }

    /// Load a library into the target, printing the handle `dlopen` returns.
    pub fn load_library(mut self, path: &Path) -> Self {
        self.0.push(format!(
            "expression -- (void *)dlopen(\"{}\", {RTLD_NOW})",
            path.display()
        ));
        self
    }

    /// Evaluate an integer expression in the target, printing it in hex.
    pub fn evaluate(mut self, expression: &str) -> Self {
        self.0.push(format!("expression -f x -- {expression}"));
        self
    }

    /// Write an instruction into the target's memory.
    pub fn write(mut self, write: &Write) -> Self {
        let bytes = write
            .instruction
            .to_le_bytes()
            .iter()
            .map(|byte| format!("{byte:#04x}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.0.push(format!(
            "memory write --size 1 --format x {:#x} {bytes}",
            write.address
        ));
        self
    }

    /// Finish the script by letting go of the process.
    pub fn detach(mut self) -> Script {
        self.0.push("process detach");
        self.0
    }
}

/// What the debugger printed while running a [`Script`], and how it exited.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// The debugger's exit code, or `None` if it was killed by a signal.
    pub code: Option<i32>,
    /// Everything written to stdout and stderr.
    pub output: String,
}

impl Transcript {
    /// Whether the debugger process itself exited cleanly.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Every `error:` line the debugger printed, without the prefix.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.output
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix("error:"))
            .map(str::trim)
    }

    /// Fail with the debugger's own complaints, if there were any.
    pub fn check(&self) -> Result<()> {
        let errors: Vec<&str> = self.errors().collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(eyre!("lldb reported: {}", errors.join("; ")))
        }
    }

    /// The values printed by `expression` commands whose result has the C type
    /// `ty`, in the order they were printed.
    ///
    /// Older LLDBs name each result (`(void *) $0 = 0x1`), newer ones don't
    /// (`(void *) 0x1`); both are understood.
    pub fn values(&self, ty: &str) -> Result<Vec<u64>> {
        let pattern = format!(
            r"^\({}\)\s+(?:\$\d+\s*=\s*)?0x([0-9a-fA-F]+)\s*$",
            regex::escape(ty)
        );
        let re = Regex::new(&pattern).wrap_err("failed to build expression result pattern")?;
        self.output
            .lines()
            .filter_map(|line| re.captures(line.trim()))
            .map(|captures| {
                u64::from_str_radix(&captures[1], 16)
                    .wrap_err(format!("couldn't parse expression result {:?}", &captures[0]))
            })
            .collect()
    }
}

/// The system LLDB, run in batch mode.
#[derive(Debug, Clone)]
pub struct Lldb {
    path: PathBuf,
}

impl Default for Lldb {
    fn default() -> Self {
        Self::new(LLDB_PATH)
    }
}

impl Lldb {
    /// Use the LLDB executable at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Debugger for Lldb {
    fn run(&mut self, script: &Script) -> Result<Transcript> {
        log::trace!("Running lldb script:\n{script}");
        let mut child = Command::new(&self.path)
            .args(["--batch", "--no-lldbinit", "--no-use-colors"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err(format!("failed to start {}", self.path.display()))?;
        let sent = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdin was not captured"))
            .and_then(|mut stdin| stdin.write_all(script.to_string().as_bytes()));
        // Dropping stdin above closes it, which is what ends the batch session.
        match sent {
            Ok(()) => {}
            // lldb quit before reading everything; its exit code says why.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("lldb stopped reading its script early: {e}");
            }
            Err(e) => {
                // Don't leave it running or unreaped.
                let _ = child.kill();
                let _ = child.wait();
                return Err(e).wrap_err("failed to send the script to lldb");
            }
        }
        let output = child
            .wait_with_output()
            .wrap_err("failed to wait for lldb to finish")?;
        let mut transcript = Transcript {
            code: output.status.code(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        };
        transcript
            .output
            .push_str(&String::from_utf8_lossy(&output.stderr));
        for line in transcript.output.lines() {
            log::debug!("[lldb] {line}");
        }
        log::trace!("lldb exited with {}", output.status);
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::Instruction;
    use expect_test::expect;

    #[test]
    fn attach_script_always_detaches() {
        let process = Process::from_pid(4242);
        let script = AttachScript::attach(&process)
            .load_library(Path::new("/tmp/Some Plugin/Image"))
            .evaluate("(unsigned long long)1")
            .write(&Write {
                address: 0x1_8f00_1000,
                instruction: Instruction::RET,
            })
            .detach();
        expect![[r#"
            settings set interpreter.stop-command-source-on-error false
            process attach --pid 4242
            expression -- (void *)dlopen("/tmp/Some Plugin/Image", 2)
            expression -f x -- (unsigned long long)1
            memory write --size 1 --format x 0x18f001000 0xc0 0x03 0x5f 0xd6
            process detach
        "#]]
        .assert_eq(&script.to_string());
        assert_eq!(script.commands().last().unwrap(), "process detach");
    }

    #[test]
    fn empty_attach_script_still_detaches() {
        let script = AttachScript::attach(&Process::from_pid(1)).detach();
        assert_eq!(
            script.commands()[1..],
            ["process attach --pid 1", "process detach"]
        );
    }

    #[test]
    fn collects_error_lines() {
        let transcript = Transcript {
            code: Some(0),
            output: "(lldb) process attach --pid 99\n\
                     error: attach failed: no such process.\n\
                     (lldb) process detach\n\
                     error: invalid process\n"
                .to_owned(),
        };
        assert_eq!(
            transcript.errors().collect::<Vec<_>>(),
            ["attach failed: no such process.", "invalid process"]
        );
        let message = transcript.check().unwrap_err().to_string();
        assert_eq!(
            message,
            "lldb reported: attach failed: no such process.; invalid process"
        );
    }

    #[test]
    fn clean_transcript_passes_check() {
        let transcript = Transcript {
            code: Some(0),
            output: "Process 12 stopped\nProcess 12 detached\n".to_owned(),
        };
        assert!(transcript.success());
        assert!(transcript.check().is_ok());
    }

    #[test]
    fn reads_expression_values_in_both_styles() {
        let transcript = Transcript {
            code: Some(0),
            output: "(lldb) expression -- (void *)dlopen(\"/x\", 2)\n\
                     (void *) $0 = 0x0000000280c4d2a0\n\
                     (lldb) expression -f x -- (unsigned long long)method_getImplementation(...)\n\
                     (unsigned long long) $1 = 0x00000001c1e2a3b4\n\
                     (unsigned long long) 0x00000001c1e2a400\n"
                .to_owned(),
        };
        assert_eq!(transcript.values("void *").unwrap(), [0x2_80c4_d2a0]);
        assert_eq!(
            transcript.values("unsigned long long").unwrap(),
            [0x1_c1e2_a3b4, 0x1_c1e2_a400]
        );
    }

    /// A script well past a pipe buffer's worth, so the writer is still busy
    /// when a debugger that doesn't read stdin has already exited.
    fn oversized_script() -> Script {
        let expression = format!("(unsigned long long){}", "0".repeat(1024));
        (0..128)
            .fold(AttachScript::attach(&Process::from_pid(1)), |script, _| {
                script.evaluate(&expression)
            })
            .detach()
    }

    #[test]
    fn debugger_exiting_without_reading_keeps_its_exit_code() {
        let script = oversized_script();
        assert!(script.to_string().len() > 64 * 1024);
        // `false` exits 1 without looking at stdin.
        let transcript = Lldb::new("false").run(&script).unwrap();
        assert_eq!(transcript.code, Some(1));
        assert!(!transcript.success());
        assert!(transcript.check().is_ok());
    }

    #[test]
    fn missing_debugger_is_an_error() {
        let script = AttachScript::attach(&Process::from_pid(1)).detach();
        assert!(Lldb::new("/nonexistent/lldb").run(&script).is_err());
    }

    #[test]
    fn signal_exit_is_not_success() {
        let transcript = Transcript {
            code: None,
            output: String::new(),
        };
        assert!(!transcript.success());
    }
}
