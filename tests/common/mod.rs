//! Common test utilities and helpers
//!
//! Integration tests run the real binary inside a temporary QMK tree with a
//! fake `qmk` script first on PATH. The script answers `qmk config` and
//! `--version`, and appends every other invocation (with `EXTRAFLAGS`) to a
//! log file.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Fake QMK CLI
const FAKE_QMK: &str = r#"#!/bin/sh
case "$1" in
  --version)
    echo "1.1.5"
    exit 0
    ;;
  config)
    case "$2" in
      user.keyboard) echo "user.keyboard=${FAKE_QMK_KEYBOARD:-None}" ;;
      user.keymap) echo "user.keymap=${FAKE_QMK_KEYMAP:-None}" ;;
    esac
    exit 0
    ;;
esac
echo "qmk $* EXTRAFLAGS=$EXTRAFLAGS" >> "$FAKE_QMK_LOG"
if [ -n "$FAKE_QMK_FAIL" ] && [ "$1" = "$FAKE_QMK_FAIL" ]; then
  echo "error: $1 failed"
  exit 2
fi
echo "ok"
exit 0
"#;

/// Test project context
///
/// A temporary QMK firmware checkout plus a `bin/` directory holding the
/// fake `qmk`.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create an empty QMK tree (`quantum/`, `keyboards/`, `util/uf2conv.py`)
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        project.create_dir("qmk_firmware/quantum");
        project.create_dir("qmk_firmware/keyboards");
        project.create_file("qmk_firmware/util/uf2conv.py", "");
        project.create_dir("config");
        project.install_fake_qmk();
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Root of the QMK tree
    pub fn qmk_root(&self) -> PathBuf {
        self.dir.path().join("qmk_firmware")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Add a keyboard with the given keyboard.json and rules.mk
    pub fn add_keyboard(&self, keyboard: &str, keyboard_json: &str, rules_mk: &str) {
        let dir = format!("qmk_firmware/keyboards/{keyboard}");
        self.create_file(&format!("{dir}/keyboard.json"), keyboard_json);
        self.create_file(&format!("{dir}/rules.mk"), rules_mk);
    }

    /// Write the global config file
    pub fn write_config(&self, content: &str) {
        self.create_file("config/config.toml", content);
    }

    /// Commands the fake qmk recorded, one per line
    pub fn qmk_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("qmk.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn install_fake_qmk(&self) {
        self.create_file("bin/qmk", FAKE_QMK);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = self.dir.path().join("bin/qmk");
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .expect("Failed to make fake qmk executable");
        }
    }

    /// Command running fieldkit inside the QMK tree with the fake qmk on PATH
    pub fn command(&self, args: &[&str]) -> Command {
        let path = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![self.dir.path().join("bin")];
        paths.extend(std::env::split_paths(&path));

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_fieldkit"));
        cmd.current_dir(self.qmk_root())
            .args(args)
            .env("PATH", std::env::join_paths(paths).expect("Invalid PATH"))
            .env("FIELDKIT_CONFIG_DIR", self.dir.path().join("config"))
            .env("FAKE_QMK_LOG", self.dir.path().join("qmk.log"))
            .env_remove("FAKE_QMK_FAIL")
            .env_remove("FAKE_QMK_KEYBOARD")
            .env_remove("FAKE_QMK_KEYMAP")
            .env_remove("EXTRAFLAGS")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run fieldkit with `args`
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("Failed to execute fieldkit")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined stdout and stderr
pub fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// keyboard.json for a split rp2040 board
pub const SPLIT_RP2040_JSON: &str = r#"{
    "keyboard_name": "sweep",
    "bootloader": "rp2040",
    "split": {"enabled": true, "transport": {"protocol": "vendor"}}
}"#;

/// keyboard.json for a split Pro Micro board
pub const SPLIT_CATERINA_JSON: &str = r#"{
    "keyboard_name": "corne",
    "bootloader": "caterina",
    "split": {"enabled": true}
}"#;

/// keyboard.json for a one-piece board
pub const SINGLE_JSON: &str = r#"{"keyboard_name": "planck", "bootloader": "stm32-dfu"}"#;
