//! Output formatting and progress indicators
//!
//! Output mode is set once at startup by [`OutputConfig::apply_global`].
//! Human-readable messages go to stdout, errors to stderr. In JSON mode the
//! commands print a single JSON document and the `print_*` helpers stay
//! silent.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::bootloader::{SequenceOutcome, WaitObserver};
use crate::core::side::Side;

static QUIET: AtomicBool = AtomicBool::new(false);
static JSON: AtomicBool = AtomicBool::new(false);
static VERBOSITY: AtomicU8 = AtomicU8::new(0);

/// Output settings from the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors
    pub quiet: bool,
    /// Machine-readable output
    pub json: bool,
    /// `-v` count
    pub verbose: u8,
}

impl OutputConfig {
    /// Create a config
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self { quiet, json, verbose }
    }

    /// Make this config the process-wide output mode
    pub fn apply_global(self) {
        QUIET.store(self.quiet, Ordering::Relaxed);
        JSON.store(self.json, Ordering::Relaxed);
        VERBOSITY.store(self.verbose, Ordering::Relaxed);
    }

    /// Log level implied by `-v`
    pub fn log_level(self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    }
}

/// Whether `--quiet` is active
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Whether `--json` is active
pub fn is_json() -> bool {
    JSON.load(Ordering::Relaxed)
}

/// Whether at least one `-v` was given
pub fn is_verbose() -> bool {
    VERBOSITY.load(Ordering::Relaxed) > 0
}

fn human_output() -> bool {
    !is_quiet() && !is_json()
}

/// Print a success message
pub fn print_success(message: &str) {
    if human_output() {
        println!("{} {message}", status::SUCCESS);
    }
}

/// Print an informational message
pub fn print_info(message: &str) {
    if human_output() {
        println!("{} {message}", status::INFO);
    }
}

/// Print a warning
pub fn print_warning(message: &str) {
    if human_output() {
        println!("{} {message}", status::WARNING);
    }
}

/// Print an indented detail line under the previous message
pub fn print_detail(message: &str) {
    if human_output() {
        println!("  {message}");
    }
}

/// Show an error returned from a command, with its cause chain
pub fn display_error(error: &anyhow::Error) {
    if is_json() {
        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "status": "error",
            "message": error.to_string(),
            "causes": causes,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        return;
    }

    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
}

/// Arrow pointing at the half being flashed
pub fn side_indicator(side: Side) -> &'static str {
    match side {
        Side::Left => "<----------------------- The one over here",
        Side::Right => "The one over there ---------------------->",
    }
}

/// Print [`side_indicator`] surrounded by blank lines
pub fn print_side_indicator(side: Side) {
    if human_output() {
        println!();
        println!("{}", side_indicator(side));
        println!();
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Spinner shown while waiting for the bootloader device
#[derive(Default)]
pub struct BootloaderSpinner {
    bar: Option<ProgressBar>,
    timeout: Duration,
}

impl BootloaderSpinner {
    /// Create an idle spinner
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitObserver for BootloaderSpinner {
    fn wait_started(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if human_output() {
            self.bar = Some(create_spinner(&format!(
                "Waiting for bootloader device (timeout: {}s)",
                timeout.as_secs()
            )));
        }
    }

    fn polled(&mut self, elapsed: Duration) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "Waiting for bootloader device ({}s / {}s)",
                elapsed.as_secs(),
                self.timeout.as_secs()
            ));
        }
    }

    fn wait_finished(&mut self, outcome: &SequenceOutcome) {
        if let Some(bar) = self.bar.take() {
            match outcome {
                SequenceOutcome::Ready { .. } => {
                    let message = format!("{} Bootloader device detected", status::SUCCESS);
                    bar.finish_with_message(message);
                }
                SequenceOutcome::TimedOut { .. } => bar.finish_and_clear(),
            }
        }
    }

    fn wait_interrupted(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
