//! Compiler options.
//!
//! Options are plain data with serde defaults, so a host can build them in
//! code, load them from a TOML file, or both, then let environment variables
//! override the knobs people flip while debugging:
//!
//! | variable | field |
//! |---|---|
//! | `OATC_THREADS` | `thread_count` |
//! | `OATC_DUMP_STATS` | `dump_stats` |
//! | `OATC_DUMP_PASSES` | `dump_passes` |

use crate::error::{DriverError, DriverResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::Path;

/// Target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSet {
    Arm,
    #[default]
    Thumb2,
    Arm64,
    X86,
    X86_64,
    Mips,
}

impl InstructionSet {
    pub fn is_64_bit(self) -> bool {
        matches!(self, InstructionSet::Arm64 | InstructionSet::X86_64)
    }

    /// Size of a pointer in generated code.
    pub fn pointer_size(self) -> usize {
        if self.is_64_bit() {
            8
        } else {
            4
        }
    }

    /// Required alignment of method code.
    pub fn code_alignment(self) -> usize {
        match self {
            InstructionSet::Arm | InstructionSet::Thumb2 | InstructionSet::Mips => 8,
            InstructionSet::Arm64 | InstructionSet::X86 | InstructionSet::X86_64 => 16,
        }
    }

    /// Offset added to a code address to form an entry point (Thumb bit).
    pub fn code_delta(self) -> u64 {
        if self == InstructionSet::Thumb2 {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstructionSet::Arm => "arm",
            InstructionSet::Thumb2 => "thumb2",
            InstructionSet::Arm64 => "arm64",
            InstructionSet::X86 => "x86",
            InstructionSet::X86_64 => "x86_64",
            InstructionSet::Mips => "mips",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Optional ISA features the backend may use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InstructionSetFeatures: u32 {
        /// Hardware integer divide (ARM).
        const DIV = 1 << 0;
        /// Large physical address extension (ARM).
        const LPAE = 1 << 1;
        /// Target is a multiprocessor; barriers cannot be elided.
        const SMP = 1 << 2;
        const SSE4_1 = 1 << 3;
        const SSE4_2 = 1 << 4;
        const POPCNT = 1 << 5;
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Options for one driver instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    pub instruction_set: InstructionSet,
    pub instruction_set_features: InstructionSetFeatures,
    /// Build a boot image.
    pub image: bool,
    /// Descriptors allowed in the image; `None` allows every class.
    pub image_classes: Option<BTreeSet<String>>,
    pub thread_count: usize,
    /// Log compilation statistics after the run.
    pub dump_stats: bool,
    /// Log per-phase timings after the run.
    pub dump_passes: bool,
    /// The image writer can patch code addresses of boot classes and methods.
    pub support_boot_image_fixup: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            instruction_set: InstructionSet::default(),
            instruction_set_features: InstructionSetFeatures::SMP,
            image: false,
            image_classes: None,
            thread_count: default_thread_count(),
            dump_stats: false,
            dump_passes: false,
            support_boot_image_fixup: true,
        }
    }
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> DriverResult<Self> {
        let options: CompilerOptions =
            toml::from_str(source).map_err(|e| DriverError::config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DriverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `OATC_*` environment overrides.
    pub fn with_env_overrides(self) -> DriverResult<Self> {
        self.with_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which maps a variable name to
    /// its value.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DriverResult<Self> {
        if let Some(raw) = lookup("OATC_THREADS") {
            self.thread_count = raw.trim().parse().map_err(|_| {
                DriverError::config(format!("OATC_THREADS must be a positive integer, got {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup("OATC_DUMP_STATS") {
            self.dump_stats = parse_flag("OATC_DUMP_STATS", &raw)?;
        }
        if let Some(raw) = lookup("OATC_DUMP_PASSES") {
            self.dump_passes = parse_flag("OATC_DUMP_PASSES", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.thread_count == 0 {
            return Err(DriverError::config("thread_count must be at least 1"));
        }
        if self.image_classes.is_some() && !self.image {
            return Err(DriverError::config(
                "image_classes is only meaningful when building an image",
            ));
        }
        Ok(())
    }

    /// Builder-style setters used by hosts and tests.
    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_image(mut self, image_classes: Option<BTreeSet<String>>) -> Self {
        self.image = true;
        self.image_classes = image_classes;
        self
    }

    pub fn with_instruction_set(mut self, instruction_set: InstructionSet) -> Self {
        self.instruction_set = instruction_set;
        self
    }
}

fn parse_flag(name: &str, raw: &str) -> DriverResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(DriverError::config(format!("{name} must be a boolean, got {raw:?}"))),
    }
}
