//! Summary of a compile run.

use crate::stats::StatsSnapshot;
use oatc_dex::MethodReference;
use serde::Serialize;

/// A method the backend could not compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodFailure {
    pub method: MethodReference,
    /// `Lpkg/Class;->name(sig)`
    pub pretty_method: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileReport {
    pub classes: usize,
    pub compiled_methods: usize,
    pub patches: usize,
    /// Distinct code buffers after deduplication.
    pub unique_code_blobs: usize,
    /// Sorted by method reference.
    pub failures: Vec<MethodFailure>,
    pub stats: StatsSnapshot,
}

impl CompileReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
