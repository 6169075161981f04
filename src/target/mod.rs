//! Composition of the make target string.
//!
//! The target is `<keyboard>:<keymap>[:<flash fragment>][:<extra>...]`.
//! Split boards are flashed one half at a time through bootloader-specific
//! targets, chosen from a substring table on the keyboard's `BOOTLOADER` rule.

use std::fmt;

use hermit_rules::RulesMap;
use serde::Serialize;

/// Marker distinguishing extra target fragments from pass-through arguments.
pub const TARGET_MARKER: char = ':';

/// Which half of a split board to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// What the user asked for regarding flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashIntent {
    #[default]
    NoFlash,
    Single,
    Left,
    Right,
}

impl FlashIntent {
    pub fn side(&self) -> Option<Side> {
        match self {
            FlashIntent::Left => Some(Side::Left),
            FlashIntent::Right => Some(Side::Right),
            FlashIntent::NoFlash | FlashIntent::Single => None,
        }
    }

    pub fn is_flash(&self) -> bool {
        !matches!(self, FlashIntent::NoFlash)
    }
}

/// Side-specific flash targets for one bootloader family.
#[derive(Debug, Clone, Copy)]
pub struct BootloaderRule {
    /// Case-insensitive substring of the `BOOTLOADER` value.
    pub pattern: &'static str,
    pub left: &'static str,
    pub right: &'static str,
}

impl BootloaderRule {
    pub fn target(&self, side: Side) -> &'static str {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Bootloader families with split flashing targets, checked in order.
pub const BOOTLOADER_RULES: &[BootloaderRule] = &[
    BootloaderRule {
        pattern: "dfu",
        left: "dfu-split-left",
        right: "dfu-split-right",
    },
    BootloaderRule {
        pattern: "caterina",
        left: "avrdude-split-left",
        right: "avrdude-split-right",
    },
];

/// Generic flash fragment.
pub const FLASH_TARGET: &str = "flash";

/// Find the rule matching a `BOOTLOADER` value.
pub fn bootloader_rule(bootloader: &str) -> Option<&'static BootloaderRule> {
    let bootloader = bootloader.to_lowercase();
    BOOTLOADER_RULES
        .iter()
        .find(|rule| bootloader.contains(rule.pattern))
}

/// Non-fatal observations made while composing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetWarning {
    /// A side was requested but the bootloader has no side-specific target.
    NoSideSpecificTarget { bootloader: String },
}

impl fmt::Display for TargetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetWarning::NoSideSpecificTarget { bootloader } => write!(
                f,
                "no left/right specific flash target for `{}` bootloader",
                bootloader
            ),
        }
    }
}

/// Inputs to [`compose_target`].
#[derive(Debug, Clone)]
pub struct TargetRequest<'a> {
    pub keyboard: &'a str,
    pub keymap: &'a str,
    pub rules: &'a RulesMap,
    pub flash: FlashIntent,
    /// Extra target fragments, marker already stripped.
    pub extra_targets: &'a [String],
    /// Arguments passed to make unchanged.
    pub make_args: &'a [String],
}

/// A composed make invocation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTarget {
    pub fragments: Vec<String>,
    pub make_args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TargetWarning>,
}

impl BuildTarget {
    /// The colon-joined target string.
    pub fn target_string(&self) -> String {
        self.fragments.join(":")
    }
}

/// Split caller extras into target fragments (leading `:` stripped) and
/// pass-through arguments, both in their original order.
pub fn partition_extra_args<S: AsRef<str>>(args: &[S]) -> (Vec<String>, Vec<String>) {
    let mut targets = Vec::new();
    let mut passthrough = Vec::new();
    for arg in args {
        let arg = arg.as_ref();
        if arg.starts_with(TARGET_MARKER) {
            targets.push(arg.trim_start_matches(TARGET_MARKER).to_string());
        } else {
            passthrough.push(arg.to_string());
        }
    }
    (targets, passthrough)
}

/// Compose the build target.
pub fn compose_target(request: &TargetRequest<'_>) -> BuildTarget {
    let mut fragments = vec![request.keyboard.to_string(), request.keymap.to_string()];
    let mut warnings = Vec::new();

    if let Some(side) = request.flash.side() {
        let bootloader = request.rules.get("BOOTLOADER").unwrap_or("");
        match bootloader_rule(bootloader) {
            Some(rule) => fragments.push(rule.target(side).to_string()),
            None => {
                warnings.push(TargetWarning::NoSideSpecificTarget {
                    bootloader: bootloader.to_lowercase(),
                });
                fragments.push(FLASH_TARGET.to_string());
            }
        }
    } else if request.flash == FlashIntent::Single {
        fragments.push(FLASH_TARGET.to_string());
    }

    fragments.extend(request.extra_targets.iter().cloned());

    BuildTarget {
        fragments,
        make_args: request.make_args.to_vec(),
        warnings,
    }
}
