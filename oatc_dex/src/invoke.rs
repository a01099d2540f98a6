use serde::{Deserialize, Serialize};
use std::fmt;

/// How a call site dispatches to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeType {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

impl InvokeType {
    pub const COUNT: usize = 5;

    pub const ALL: [InvokeType; Self::COUNT] = [
        InvokeType::Static,
        InvokeType::Direct,
        InvokeType::Virtual,
        InvokeType::Super,
        InvokeType::Interface,
    ];

    /// Dense index, used for per-kind counters.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Static and direct calls never go through a dispatch table.
    #[inline]
    pub fn is_sharp(self) -> bool {
        matches!(self, InvokeType::Static | InvokeType::Direct)
    }
}

impl fmt::Display for InvokeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvokeType::Static => "static",
            InvokeType::Direct => "direct",
            InvokeType::Virtual => "virtual",
            InvokeType::Super => "super",
            InvokeType::Interface => "interface",
        };
        f.write_str(name)
    }
}
