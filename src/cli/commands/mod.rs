//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod bootloader;
pub mod doctor;
pub mod flash;
pub mod info;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::core::features::FeatureDescriptor;
use crate::core::global_config::GlobalConfig;
use crate::core::side::RequestedSide;
use crate::infra::dirs::FieldKitDirs;
use crate::infra::hid::HidTransport;
use crate::infra::qmk;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and flash one half of the keyboard
    Flash {
        /// Side to flash: left, right or auto (default: auto when side lock is enabled)
        side: Option<RequestedSide>,

        /// Keyboard to flash (overrides qmk config user.keyboard)
        #[arg(short, long)]
        keyboard: Option<String>,

        /// Flash the requested side even if the keyboard is locked to the other one
        #[arg(short, long)]
        force: bool,
    },

    /// Show keyboard information and detected features
    Info {
        /// Keyboard to inspect (overrides qmk config user.keyboard)
        #[arg(short, long)]
        keyboard: Option<String>,
    },

    /// Enter bootloader mode without flashing
    Bootloader {
        /// Keyboard to use (overrides qmk config user.keyboard)
        #[arg(short, long)]
        keyboard: Option<String>,
    },

    /// Check that the flash environment is ready
    Doctor,

    /// Test HID communication with the keyboard
    HidTest,
}

impl Commands {
    /// Execute the command
    pub fn run(self) -> Result<()> {
        match self {
            Commands::Flash {
                side,
                keyboard,
                force,
            } => flash::execute(side, keyboard.as_deref(), force),
            Commands::Info { keyboard } => info::execute(keyboard.as_deref()),
            Commands::Bootloader { keyboard } => bootloader::execute(keyboard.as_deref()),
            Commands::Doctor => doctor::execute(),
            Commands::HidTest => hid_test::execute(),
        }
    }
}

/// Per-invocation state shared by the commands
pub(crate) struct CommandContext {
    pub config: GlobalConfig,
    pub cwd: PathBuf,
}

impl CommandContext {
    /// Load global config and note the working directory
    pub fn load() -> Result<Self> {
        let config =
            GlobalConfig::load(&FieldKitDirs::new()).context("Failed to load global config")?;
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self { config, cwd })
    }

    /// Features of `keyboard`, or of the keyboard selected in qmk config
    pub fn features(&self, keyboard: Option<&str>) -> Result<FeatureDescriptor> {
        let keyboard = match keyboard {
            Some(name) => name.to_string(),
            None => qmk::current_keyboard(self.config.qmk_binary())?,
        };
        let root = qmk::find_qmk_root(&self.cwd);
        qmk::load_features(&root, &keyboard)
            .with_context(|| format!("Error detecting features for '{keyboard}'"))
    }

    /// HID transport configured from global config
    pub fn transport(&self) -> HidTransport {
        HidTransport::new(self.config.vendor_id(), self.config.product_id())
            .with_usage_page(self.config.usage_page())
    }
}
