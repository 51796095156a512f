use serde::{Deserialize, Serialize};

/// A catalog item left out of a build, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSkip {
    pub identity: String,
    pub reason: String,
}

/// Summary of one index build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Items taken from the snapshot (after the sample cap)
    pub attempted: usize,

    /// Items that received an ordinal
    pub indexed: usize,

    pub skipped: Vec<BuildSkip>,

    pub dimension: usize,
    pub trees: usize,
    pub leaf_size: usize,
    pub build_id: String,
    pub provider: String,

    /// Wall time in milliseconds
    pub elapsed_ms: u64,

    /// Time spent waiting for the build lock, when one was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_ms: Option<u64>,
}

impl BuildReport {
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}
