//! Error handling for voxel-core.
//!
//! Per SPEC_FULL.md §7, core operations are total: invalid inputs are
//! clamped, ignored, or answered with a sentinel value (negative raycast
//! distance, `-1` slot index, a zeroed result struct). The sole fallible
//! path is construction-time allocation failure, represented here.

/// The one failure class this crate reports through `Result`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("allocation failed constructing {what} ({requested_bytes} bytes requested)")]
    AllocationFailed {
        what: &'static str,
        requested_bytes: usize,
    },

    #[error("invalid construction parameters for {what}: {reason}")]
    InvalidParameters { what: &'static str, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
