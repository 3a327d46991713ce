//! Errors surfaced by [`CombinedProgress`](crate::CombinedProgress).

use thiserror::Error;

/// Hard failures. Duplicate attaches, missing remove targets and late reports are
/// resolved as no-ops and never produce one of these.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProgressError {
    /// The source count would no longer be exactly representable in the value type.
    #[error(
        "attaching another source would raise the count to {count}, beyond the exact range of {type_name}"
    )]
    RangeExceeded {
        /// Count the attach would have produced.
        count: usize,
        /// Name of the value type.
        type_name: &'static str,
    },
}
