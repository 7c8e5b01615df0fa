//! Flash orchestration
//!
//! Turns a feature descriptor and a resolved side into an ordered list of
//! steps and runs them. Build and deploy steps are external commands; the
//! bootloader step goes through a [`BootloaderEntry`].
//!
//! | split | auto bootloader | steps |
//! |-------|-----------------|-------|
//! | no    | yes             | compile |
//! | no    | no              | flash |
//! | yes   | yes             | compile with side defines, bootloader, deploy |
//! | yes   | no              | side-specific flash |
//!
//! Every plan starts with `qmk clean`. The first failing step aborts the
//! rest; nothing already done is undone.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::bootloader::{BootloaderEntry, SequenceOutcome};
use super::features::{FeatureDescriptor, McuFamily};
use super::side::{RequestedSide, Side, SideArbiter, SideAssignment};
use super::protocol::Transport;
use crate::error::FlashError;

/// A fully described external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Program to run
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory, if not the current one
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Run `program` with `args`
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run inside `dir`
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cwd) = &self.cwd {
            write!(f, "cd {} && ", cwd.display())?;
        }
        for (key, value) in &self.env {
            write!(f, "{key}=\"{value}\" ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status and captured output of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
}

/// Runs build and deploy commands
pub trait CommandRunner {
    /// Run to completion. `Err` only when the command could not be started.
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput, FlashError>;
}

/// One step of a flash plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Remove stale build artifacts
    Clean(Invocation),
    /// Compile, or compile and flash
    Build(Invocation),
    /// Put the keyboard into its bootloader
    EnterBootloader(McuFamily),
    /// Write the image to a keyboard already in its bootloader
    Deploy(Invocation),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Clean(inv) | Step::Build(inv) | Step::Deploy(inv) => inv.fmt(f),
            Step::EnterBootloader(family) => write!(f, "enter {family} bootloader"),
        }
    }
}

/// Host-side facts the plan needs beyond the feature descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashContext {
    /// `qmk` executable
    pub qmk_binary: String,
    /// Keymap being built
    pub keymap: String,
    /// QMK firmware root containing `util/uf2conv.py`
    pub qmk_root: Option<PathBuf>,
}

impl Default for FlashContext {
    fn default() -> Self {
        Self {
            qmk_binary: "qmk".to_string(),
            keymap: "default".to_string(),
            qmk_root: None,
        }
    }
}

/// Ordered steps for one flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    /// Steps, in execution order
    pub steps: Vec<Step>,
}

impl FlashPlan {
    /// Work out the steps for flashing `side` of a keyboard with `features`
    pub fn new(
        features: &FeatureDescriptor,
        side: Side,
        ctx: &FlashContext,
    ) -> Result<Self, FlashError> {
        let qmk = |args: &[&str]| Invocation::new(&ctx.qmk_binary, args.iter().copied());
        let split_target = |bootloader: &str| format!("{bootloader}-split-{side}");

        let mut steps = vec![Step::Clean(qmk(&["clean"]))];

        match (features.split_enabled, features.auto_bootloader) {
            (false, true) => steps.push(Step::Build(qmk(&["compile"]))),
            (false, false) => steps.push(Step::Build(qmk(&["flash"]))),
            (true, true) => {
                let suffix = side.define_suffix();
                let defines = format!("-DMASTER_{suffix} -DINIT_EE_HANDS_{suffix}");
                steps.push(Step::Build(qmk(&["compile"]).env("EXTRAFLAGS", defines)));
                steps.push(Step::EnterBootloader(features.mcu_family));

                let deploy = if features.bootloader == "rp2040" {
                    let root = ctx.qmk_root.clone().ok_or_else(|| FlashError::Configuration {
                        message: "Could not find QMK firmware root (util/uf2conv.py)".to_string(),
                    })?;
                    Invocation::new(
                        "./util/uf2conv.py",
                        ["--wait".to_string(), "--deploy".to_string(), image_name(features, ctx)],
                    )
                    .current_dir(root)
                } else {
                    qmk(&["flash", "-bl", split_target(&features.bootloader).as_str()])
                };
                steps.push(Step::Deploy(deploy));
            }
            (true, false) => {
                let bootloader = if features.bootloader == "rp2040" {
                    "uf2"
                } else {
                    features.bootloader.as_str()
                };
                steps.push(Step::Build(qmk(&["flash", "-bl", split_target(bootloader).as_str()])));
            }
        }

        Ok(Self { steps })
    }
}

/// `<keyboard>_<keymap>.uf2` with path separators flattened
pub fn image_name(features: &FeatureDescriptor, ctx: &FlashContext) -> String {
    format!("{}_{}.uf2", features.keyboard.replace('/', "_"), ctx.keymap)
}

/// Result of a completed flash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashReport {
    /// Side that was flashed
    pub side: Side,
    /// Commands that ran, in order
    pub commands: Vec<String>,
    /// Bootloader outcome, if a bootloader step ran
    pub bootloader: Option<SequenceOutcome>,
    /// Non-fatal problems
    pub warnings: Vec<String>,
}

/// Runs a flash plan
pub struct FlashOrchestrator<R: CommandRunner, B: BootloaderEntry> {
    runner: R,
    bootloader: B,
    ctx: FlashContext,
}

impl<R: CommandRunner, B: BootloaderEntry> FlashOrchestrator<R, B> {
    /// Create an orchestrator
    pub fn new(runner: R, bootloader: B, ctx: FlashContext) -> Self {
        Self {
            runner,
            bootloader,
            ctx,
        }
    }

    /// Plan and run the flash for an already resolved side
    pub fn sequence(
        &mut self,
        features: &FeatureDescriptor,
        assignment: &SideAssignment,
    ) -> Result<FlashReport, FlashError> {
        let plan = FlashPlan::new(features, assignment.resolved, &self.ctx)?;
        let mut report = FlashReport {
            side: assignment.resolved,
            commands: Vec::new(),
            bootloader: None,
            warnings: Vec::new(),
        };

        for step in &plan.steps {
            match step {
                Step::Clean(inv) | Step::Build(inv) | Step::Deploy(inv) => {
                    self.run_command(inv)?;
                    report.commands.push(inv.to_string());
                }
                Step::EnterBootloader(family) => {
                    tracing::info!("Triggering bootloader mode for {}", family);
                    let outcome = self.bootloader.enter(*family)?;
                    match outcome {
                        SequenceOutcome::TimedOut { waited } => report.warnings.push(format!(
                            "Bootloader device not detected after {:.0}s, attempting deploy anyway",
                            waited.as_secs_f64()
                        )),
                        SequenceOutcome::Ready {
                            manual_action_required: true,
                        } if *family != McuFamily::Unknown => report.warnings.push(format!(
                            "Automatic {family} bootloader entry unavailable, \
                             make sure the keyboard is in bootloader mode"
                        )),
                        SequenceOutcome::Ready { .. } => {}
                    }
                    report.bootloader = Some(outcome);
                }
            }
        }

        Ok(report)
    }

    /// Access the runner
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Access the bootloader step
    pub fn bootloader(&self) -> &B {
        &self.bootloader
    }

    fn run_command(&mut self, invocation: &Invocation) -> Result<(), FlashError> {
        tracing::info!("Running: {}", invocation);
        let output = self.runner.run(invocation)?;
        if output.exit_code != 0 {
            return Err(FlashError::ExternalCommand {
                command: invocation.to_string(),
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }
}

/// What the caller asked to flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRequest {
    /// Requested side
    pub side: RequestedSide,
    /// Bypass side lock
    pub force: bool,
}

/// Resolve the side, then run the flash sequence
///
/// `on_resolved` sees the assignment before the first command runs. Nothing
/// external runs if side arbitration aborts.
pub fn flash_keyboard<T, R, B, F>(
    features: &FeatureDescriptor,
    request: FlashRequest,
    arbiter: &SideArbiter<'_, T>,
    orchestrator: &mut FlashOrchestrator<R, B>,
    on_resolved: F,
) -> Result<(SideAssignment, FlashReport), FlashError>
where
    T: Transport,
    R: CommandRunner,
    B: BootloaderEntry,
    F: FnOnce(&SideAssignment),
{
    let assignment = arbiter.resolve(request.side, request.force, features)?;
    tracing::info!(
        "Flashing the {} side of {}",
        assignment.resolved,
        features.keyboard
    );
    on_resolved(&assignment);
    let report = orchestrator.sequence(features, &assignment)?;
    Ok((assignment, report))
}
