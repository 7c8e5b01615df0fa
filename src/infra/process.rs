//! External command execution

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::core::flash::{CommandOutput, CommandRunner, Invocation};
use crate::error::FlashError;

/// Where a child's output is copied while it runs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Child stdout to our stdout, child stderr to our stderr
    Terminal,
    /// Everything to our stderr, keeping stdout free for JSON
    Stderr,
    /// Collect only
    #[default]
    Silent,
}

impl Echo {
    fn stdout_sink(self) -> Option<Box<dyn Write + Send>> {
        match self {
            Echo::Terminal => Some(Box::new(io::stdout())),
            Echo::Stderr => Some(Box::new(io::stderr())),
            Echo::Silent => None,
        }
    }

    fn stderr_sink(self) -> Option<Box<dyn Write + Send>> {
        match self {
            Echo::Terminal | Echo::Stderr => Some(Box::new(io::stderr())),
            Echo::Silent => None,
        }
    }
}

/// Runs invocations as child processes
///
/// The child inherits our stdin so tools waiting on the user keep working.
/// Output is collected for [`CommandOutput`] and copied to the [`Echo`]
/// target as it arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner {
    echo: Echo,
}

impl SystemRunner {
    /// Create a runner that collects output without echoing it
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy child output to `echo` while collecting it
    #[must_use]
    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }
}

/// Resolve `./tool` style programs against the working directory the
/// child will run in
fn program_path(program: &str, cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(dir) if program.contains('/') && Path::new(program).is_relative() => {
            dir.join(program)
        }
        _ => PathBuf::from(program),
    }
}

/// Read `reader` to the end, forwarding each chunk to `sink` unbuffered
fn pump<R: Read>(mut reader: R, mut sink: Option<Box<dyn Write + Send>>) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if let Some(out) = sink.as_mut() {
                    // A closed terminal must not stop collection
                    let _ = out.write_all(&buf[..n]).and_then(|()| out.flush());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
    collected
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput, FlashError> {
        let program = program_path(&invocation.program, invocation.cwd.as_deref());
        let mut command = Command::new(program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let spawn_error = |e: io::Error| FlashError::Spawn {
            command: invocation.to_string(),
            error: e.to_string(),
        };

        tracing::debug!("Spawning {:?}", command);
        let mut child = command.spawn().map_err(spawn_error)?;

        let echo = self.echo;
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || pump(stderr, echo.stderr_sink())));
        let mut combined = child
            .stdout
            .take()
            .map(|stdout| pump(stdout, echo.stdout_sink()))
            .unwrap_or_default();
        if let Some(handle) = stderr_reader {
            combined.extend(handle.join().unwrap_or_default());
        }

        let status = child.wait().map_err(spawn_error)?;

        // Killed by a signal has no exit code
        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!("{} exited with {}", invocation.program, exit_code);

        Ok(CommandOutput {
            exit_code,
            output: String::from_utf8_lossy(&combined).into_owned(),
        })
    }
}

/// Run `program args` and return trimmed stdout, or `None` on any failure
pub fn capture_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        tracing::debug!("{} {:?} exited with {:?}", program, args, output.status.code());
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
