//! Doctor command logic
//!
//! Checks that the host can build and flash the selected keyboard. Probing
//! the host happens in [`gather_facts`]; everything after that is pure.

use std::path::{Path, PathBuf};

use super::features::FeatureDescriptor;

/// Result of a single check
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckResult {
    /// Name of the thing being checked
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Version or location, if known
    pub detail: Option<String>,
    /// Error message if check failed
    pub error: Option<String>,
    /// Suggestion for fixing the issue
    pub suggestion: Option<String>,
    /// Whether a failure blocks flashing
    pub required: bool,
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: &str, detail: Option<String>, required: bool) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail,
            error: None,
            suggestion: None,
            required,
        }
    }

    /// Create a failing check result
    pub fn fail(name: &str, error: &str, suggestion: Option<&str>, required: bool) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: None,
            error: Some(error.to_string()),
            suggestion: suggestion.map(String::from),
            required,
        }
    }
}

/// Overall doctor report
#[derive(Debug, Default, serde::Serialize)]
pub struct DoctorReport {
    /// Individual check results
    pub checks: Vec<CheckResult>,
}

impl DoctorReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check result
    pub fn add_check(&mut self, result: CheckResult) {
        self.checks.push(result);
    }

    /// Check if all required checks passed
    pub fn all_required_passed(&self) -> bool {
        self.checks.iter().filter(|c| c.required).all(|c| c.passed)
    }

    /// Count passed checks
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// Count failed checks
    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    /// Get all failed required checks
    pub fn failed_required(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .collect()
    }
}

/// What the doctor knows about the host
#[derive(Debug, Clone)]
pub struct EnvironmentFacts {
    /// Host OS as in `std::env::consts::OS`
    pub host_os: String,
    /// `qmk` location and version
    pub qmk: Option<(PathBuf, Option<String>)>,
    /// Selected keyboard, or why none could be determined
    pub keyboard: Result<String, String>,
    /// Features of the selected keyboard, when readable
    pub features: Option<FeatureDescriptor>,
    /// `picotool` location
    pub picotool: Option<PathBuf>,
    /// QMK root containing `util/uf2conv.py`
    pub uf2_root: Option<PathBuf>,
    /// Number of HID devices visible, or the backend error
    pub hid: Result<usize, String>,
}

/// Locate `command` on PATH and ask it for its version
pub fn check_command_available(command: &str) -> Option<(PathBuf, Option<String>)> {
    let path = which::which(command).ok()?;
    let version = std::process::Command::new(&path)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            extract_version(&combined)
        });
    Some((path, version))
}

/// Extract version string from command output
fn extract_version(output: &str) -> Option<String> {
    let version_regex = regex::Regex::new(r"v?(\d+\.\d+(?:\.\d+)?(?:-\w+)?)").ok()?;
    version_regex
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// QMK CLI on PATH
pub fn check_qmk(qmk: Option<&(PathBuf, Option<String>)>) -> CheckResult {
    match qmk {
        Some((path, version)) => CheckResult::pass(
            "QMK CLI",
            Some(version.clone().unwrap_or_else(|| path.display().to_string())),
            true,
        ),
        None => CheckResult::fail(
            "QMK CLI",
            "qmk command not found in PATH",
            Some("Install the QMK CLI: python3 -m pip install qmk"),
            true,
        ),
    }
}

/// A keyboard is selected in qmk config
pub fn check_keyboard(keyboard: &Result<String, String>) -> CheckResult {
    match keyboard {
        Ok(name) => CheckResult::pass("Keyboard selected", Some(name.clone()), true),
        Err(reason) => CheckResult::fail(
            "Keyboard selected",
            reason,
            Some("Select one with 'qmk config user.keyboard=<name>'"),
            true,
        ),
    }
}

/// picotool on macOS for rp2040 keyboards; `None` when not applicable
pub fn check_picotool(
    host_os: &str,
    features: Option<&FeatureDescriptor>,
    picotool: Option<&Path>,
) -> Option<CheckResult> {
    if host_os != "macos" || features.map(|f| f.bootloader.as_str()) != Some("rp2040") {
        return None;
    }
    Some(match picotool {
        Some(path) => CheckResult::pass("picotool", Some(path.display().to_string()), false),
        None => CheckResult::fail(
            "picotool",
            "picotool not found in PATH",
            Some("Install with 'brew install picotool'"),
            false,
        ),
    })
}

/// uf2conv.py reachable for split rp2040 keyboards with auto bootloader;
/// `None` when not applicable
pub fn check_uf2_deploy(
    features: Option<&FeatureDescriptor>,
    uf2_root: Option<&Path>,
) -> Option<CheckResult> {
    let features = features?;
    if !(features.split_enabled && features.auto_bootloader && features.bootloader == "rp2040") {
        return None;
    }
    Some(match uf2_root {
        Some(root) => CheckResult::pass("uf2conv.py", Some(root.display().to_string()), true),
        None => CheckResult::fail(
            "uf2conv.py",
            "Could not find QMK firmware root (util/uf2conv.py)",
            Some("Run fieldkit from inside your qmk_firmware checkout"),
            true,
        ),
    })
}

/// HID backend usable
pub fn check_hid(hid: &Result<usize, String>) -> CheckResult {
    match hid {
        Ok(count) => {
            CheckResult::pass("HID backend", Some(format!("{count} devices visible")), false)
        }
        Err(error) => CheckResult::fail(
            "HID backend",
            error,
            Some(
                "Side lock and automatic bootloader entry need HID access \
                 (check udev rules on Linux)",
            ),
            false,
        ),
    }
}

/// Evaluate every check against `facts`
pub fn run_doctor(facts: &EnvironmentFacts) -> DoctorReport {
    let mut report = DoctorReport::new();

    report.add_check(check_qmk(facts.qmk.as_ref()));
    report.add_check(check_keyboard(&facts.keyboard));
    let picotool = facts.picotool.as_deref();
    if let Some(check) = check_picotool(&facts.host_os, facts.features.as_ref(), picotool) {
        report.add_check(check);
    }
    if let Some(check) = check_uf2_deploy(facts.features.as_ref(), facts.uf2_root.as_deref()) {
        report.add_check(check);
    }
    report.add_check(check_hid(&facts.hid));

    report
}

/// Probe the host
pub fn gather_facts(qmk_binary: &str, cwd: &Path) -> EnvironmentFacts {
    use crate::infra::{hid, qmk};

    let qmk_found = check_command_available(qmk_binary);
    let keyboard = if qmk_found.is_some() {
        qmk::current_keyboard(qmk_binary).map_err(|e| e.to_string())
    } else {
        Err("Cannot query qmk config without the QMK CLI".to_string())
    };
    let features = keyboard
        .as_ref()
        .ok()
        .and_then(|kb| qmk::load_features(&qmk::find_qmk_root(cwd), kb).ok());

    EnvironmentFacts {
        host_os: std::env::consts::OS.to_string(),
        qmk: qmk_found,
        keyboard,
        features,
        picotool: which::which("picotool").ok(),
        uf2_root: qmk::find_uf2_root(cwd),
        hid: hid::device_count().map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{FeatureDescriptor, KeyboardJson};

    fn rp2040_split() -> FeatureDescriptor {
        let json = r#"{"bootloader": "rp2040", "split": {"enabled": true}}"#;
        let json = KeyboardJson::from_json(json).unwrap();
        let mut rules = std::collections::BTreeMap::new();
        rules.insert("AUTO_BOOTLOADER_ENABLE".to_string(), "yes".to_string());
        FeatureDescriptor::from_config("sweep", PathBuf::from("keyboards/sweep"), &json, rules)
    }

    fn facts() -> EnvironmentFacts {
        EnvironmentFacts {
            host_os: "linux".to_string(),
            qmk: Some((PathBuf::from("/usr/bin/qmk"), Some("1.1.5".to_string()))),
            keyboard: Ok("sweep".to_string()),
            features: Some(rp2040_split()),
            picotool: None,
            uf2_root: Some(PathBuf::from("/src/qmk_firmware")),
            hid: Ok(3),
        }
    }

    #[test]
    fn test_check_result_fail() {
        let result = CheckResult::fail("test", "error", Some("suggestion"), false);
        assert!(!result.passed);
        assert_eq!(result.error, Some("error".to_string()));
        assert_eq!(result.suggestion, Some("suggestion".to_string()));
        assert!(!result.required);
    }

    #[test]
    fn test_healthy_linux_host() {
        let report = run_doctor(&facts());
        assert!(report.all_required_passed());
        assert_eq!(report.failed_count(), 0);
        assert!(!report.checks.iter().any(|c| c.name == "picotool"));
    }

    #[test]
    fn test_missing_qmk_blocks_flashing() {
        let report = run_doctor(&EnvironmentFacts {
            qmk: None,
            keyboard: Err("Cannot query qmk config without the QMK CLI".to_string()),
            features: None,
            ..facts()
        });
        let failed: Vec<_> = report.failed_required().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["QMK CLI", "Keyboard selected"]);
    }

    #[test]
    fn test_picotool_only_checked_on_macos_rp2040() {
        let report = run_doctor(&EnvironmentFacts {
            host_os: "macos".to_string(),
            ..facts()
        });
        let picotool = report.checks.iter().find(|c| c.name == "picotool").unwrap();
        assert!(!picotool.passed);
        assert!(!picotool.required);
        assert!(report.all_required_passed());
    }

    #[test]
    fn test_uf2_root_required_for_split_rp2040_auto() {
        let report = run_doctor(&EnvironmentFacts {
            uf2_root: None,
            ..facts()
        });
        assert_eq!(report.failed_required().len(), 1);
        assert_eq!(report.failed_required()[0].name, "uf2conv.py");
    }

    #[test]
    fn test_hid_failure_is_optional() {
        let report = run_doctor(&EnvironmentFacts {
            hid: Err("hidapi init failed".to_string()),
            ..facts()
        });
        assert!(report.all_required_passed());
        assert_eq!(report.passed_count(), report.checks.len() - 1);
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("1.1.5"), Some("1.1.5".to_string()));
        assert_eq!(extract_version("picotool v1.1.2 (Darwin)"), Some("1.1.2".to_string()));
    }
}
