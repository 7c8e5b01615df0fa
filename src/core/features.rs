//! Keyboard feature descriptor
//!
//! Combines `keyboard.json` and `rules.mk` into the immutable snapshot the
//! flash sequence works from. Reading the files is left to
//! [`crate::infra::qmk`]; this module only interprets their contents.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum depth of nested `include` directives in rules.mk
const MAX_INCLUDE_DEPTH: usize = 8;

/// Microcontroller class, deciding how the bootloader is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McuFamily {
    /// Raspberry Pi RP2040
    Rp2040,
    /// AVR (ATmega32U4 and friends)
    Avr,
    /// ARM Cortex-M (STM32)
    Arm,
    /// Anything we cannot classify
    #[default]
    Unknown,
}

impl McuFamily {
    /// Classify a QMK bootloader name
    pub fn from_bootloader(bootloader: &str) -> Self {
        match bootloader {
            "rp2040" => McuFamily::Rp2040,
            "atmel-dfu" | "caterina" | "halfkay" => McuFamily::Avr,
            "stm32-dfu" | "stm32duino" => McuFamily::Arm,
            _ => McuFamily::Unknown,
        }
    }
}

impl fmt::Display for McuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            McuFamily::Rp2040 => "rp2040",
            McuFamily::Avr => "avr",
            McuFamily::Arm => "arm",
            McuFamily::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Everything the flash sequence needs to know about a keyboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureDescriptor {
    /// QMK keyboard identifier, e.g. `crkbd/rev1`
    pub keyboard: String,
    /// Keyboard directory inside the QMK tree
    pub keyboard_path: PathBuf,
    /// QMK bootloader name
    pub bootloader: String,
    /// Derived from `bootloader`
    pub mcu_family: McuFamily,
    /// `split.enabled` in keyboard.json
    pub split_enabled: bool,
    /// Split transport, only set for split keyboards
    pub transport_protocol: Option<String>,
    /// `AUTO_BOOTLOADER_ENABLE = yes`
    pub auto_bootloader: bool,
    /// `SIDE_LOCK_ENABLE = yes`
    pub side_lock_enabled: bool,
    /// Every rules.mk assignment, after includes
    pub rules: BTreeMap<String, String>,
}

impl FeatureDescriptor {
    /// Build a descriptor from parsed config. Missing data falls back to
    /// `unknown` / `false`.
    pub fn from_config(
        keyboard: &str,
        keyboard_path: PathBuf,
        json: &KeyboardJson,
        rules: BTreeMap<String, String>,
    ) -> Self {
        let bootloader = json
            .bootloader
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let split = json.split.clone().unwrap_or_default();

        let transport_protocol = split.enabled.then(|| {
            split
                .transport
                .and_then(|t| t.protocol)
                .unwrap_or_else(|| "serial".to_string())
        });

        let flag = |key: &str| rules.get(key).is_some_and(|v| v.eq_ignore_ascii_case("yes"));

        Self {
            keyboard: keyboard.to_string(),
            keyboard_path,
            mcu_family: McuFamily::from_bootloader(&bootloader),
            bootloader,
            split_enabled: split.enabled,
            transport_protocol,
            auto_bootloader: flag("AUTO_BOOTLOADER_ENABLE"),
            side_lock_enabled: flag("SIDE_LOCK_ENABLE"),
            rules,
        }
    }
}

/// The subset of keyboard.json we read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyboardJson {
    /// Bootloader name
    #[serde(default)]
    pub bootloader: Option<String>,
    /// Split keyboard section
    #[serde(default)]
    pub split: Option<SplitJson>,
}

/// `split` section of keyboard.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitJson {
    /// Whether the keyboard is split
    #[serde(default)]
    pub enabled: bool,
    /// Transport between halves
    #[serde(default)]
    pub transport: Option<TransportJson>,
}

/// `split.transport` section of keyboard.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportJson {
    /// Protocol name (serial, i2c, ...)
    #[serde(default)]
    pub protocol: Option<String>,
}

impl KeyboardJson {
    /// Parse keyboard.json content
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

/// Parse rules.mk assignments
///
/// Supports `=`, `:=`, `?=` and `+=`, strips trailing `#` comments and
/// follows `include <path>` lines through `load`, which returns the
/// included file's content. Later assignments override earlier ones.
pub fn parse_rules_mk<F>(content: &str, load: &mut F) -> BTreeMap<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let assignment = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(\+=|:=|\?=|=)\s*(.*)$")
        .expect("rules.mk assignment pattern is valid");
    let mut values = BTreeMap::new();
    parse_rules_into(content, &assignment, load, &mut values, 0);
    values
}

fn parse_rules_into<F>(
    content: &str,
    assignment: &Regex,
    load: &mut F,
    values: &mut BTreeMap<String, String>,
    depth: usize,
) where
    F: FnMut(&str) -> Option<String>,
{
    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("include ") {
            if depth >= MAX_INCLUDE_DEPTH {
                tracing::warn!("Ignoring include '{}': nested too deeply", path.trim());
                continue;
            }
            match load(path.trim()) {
                Some(included) => {
                    parse_rules_into(&included, assignment, load, values, depth + 1);
                }
                None => tracing::debug!("Included rules file '{}' not found", path.trim()),
            }
            continue;
        }

        let Some(caps) = assignment.captures(line) else {
            continue;
        };
        let key = caps[1].to_string();
        let value = caps[3].trim().to_string();

        match &caps[2] {
            "+=" => {
                let entry = values.entry(key).or_default();
                if !entry.is_empty() {
                    entry.push(' ');
                }
                entry.push_str(&value);
            }
            "?=" => {
                values.entry(key).or_insert(value);
            }
            _ => {
                values.insert(key, value);
            }
        }
    }
}
