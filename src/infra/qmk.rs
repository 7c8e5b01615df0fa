//! QMK tree and CLI access
//!
//! Locates the QMK firmware checkout, asks `qmk config` for the selected
//! keyboard and keymap, and reads a keyboard's `keyboard.json` and
//! `rules.mk` into a [`FeatureDescriptor`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::defaults::DEFAULT_KEYMAP;
use crate::core::features::{parse_rules_mk, FeatureDescriptor, KeyboardJson};
use crate::error::FeatureError;
use crate::infra::process::capture_stdout;

/// Value part of `qmk config` output such as `user.keyboard=crkbd/rev1`
///
/// `qmk` prints `None` for unset keys.
pub fn parse_config_value(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains('='))?;
    let (_, value) = line.split_once('=')?;
    let value = value.trim();
    (!value.is_empty() && value != "None").then(|| value.to_string())
}

/// Keyboard selected with `qmk config user.keyboard`
pub fn current_keyboard(qmk_binary: &str) -> Result<String, FeatureError> {
    capture_stdout(qmk_binary, &["config", "user.keyboard"])
        .as_deref()
        .and_then(parse_config_value)
        .ok_or(FeatureError::KeyboardNotSelected)
}

/// Keymap selected with `qmk config user.keymap`, `default` if unset
pub fn current_keymap(qmk_binary: &str) -> String {
    capture_stdout(qmk_binary, &["config", "user.keymap"])
        .as_deref()
        .and_then(parse_config_value)
        .unwrap_or_else(|| DEFAULT_KEYMAP.to_string())
}

/// Nearest ancestor of `start` with `quantum/` and `keyboards/`, or `start`
/// itself if there is none
pub fn find_qmk_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join("quantum").is_dir() && dir.join("keyboards").is_dir())
        .unwrap_or(start)
        .to_path_buf()
}

/// Nearest ancestor of `start` containing `util/uf2conv.py`
pub fn find_uf2_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join("util").join("uf2conv.py").is_file())
        .map(Path::to_path_buf)
}

fn read_optional(path: &Path) -> Result<Option<String>, FeatureError> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| FeatureError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

/// Read the features of `keyboard` from the QMK tree at `qmk_root`
///
/// Missing files are treated as empty. `include` lines in rules.mk are
/// resolved against the keyboard directory first, then the QMK root.
pub fn load_features(qmk_root: &Path, keyboard: &str) -> Result<FeatureDescriptor, FeatureError> {
    let keyboard_path = qmk_root.join("keyboards").join(keyboard);
    tracing::debug!("Reading keyboard config from {}", keyboard_path.display());

    let json_path = keyboard_path.join("keyboard.json");
    let json = match read_optional(&json_path)? {
        Some(content) => KeyboardJson::from_json(&content).map_err(|e| FeatureError::Parse {
            path: json_path.clone(),
            error: e.to_string(),
        })?,
        None => {
            tracing::debug!("{} not found", json_path.display());
            KeyboardJson::default()
        }
    };

    let rules_path = keyboard_path.join("rules.mk");
    let rules = match read_optional(&rules_path)? {
        Some(content) => {
            let mut load = |include: &str| {
                [keyboard_path.join(include), qmk_root.join(include)]
                    .iter()
                    .find_map(|candidate| fs::read_to_string(candidate).ok())
            };
            parse_rules_mk(&content, &mut load)
        }
        None => Default::default(),
    };

    Ok(FeatureDescriptor::from_config(keyboard, keyboard_path, &json, rules))
}
