//! # `combined_progress`
//!
//! Thread-safe aggregation of many progress sources into one combined progress value.
//!
//! Every sub-task reports through its own [`Progress`]. A [`CombinedProgress`] observes
//! any number of them and re-emits the mean of their latest values through a
//! [`Progress`] of its own, so a UI or monitor sees one "percent done" figure. It is
//! designed to be:
//!
//! * **Concurrent**: Sources may report from any thread while sources are attached,
//!   removed or reset. Each report produces exactly one combined emission.
//! * **Exact**: Integer value types average without losing truncated remainders.
//! * **Composable**: An aggregator is itself a progress source and can be attached to
//!   another aggregator.
//!
//! ## Modules
//!
//! * [`progress`]: The single-source notification primitive.
//! * [`combined`]: The [`CombinedProgress`] aggregator and its snapshots.
//! * [`builder`]: Fluent construction of aggregators.
//! * [`value`]: The [`ProgressValue`] numeric bound.
//! * [`simulation`]: Simulated workers used by the demo binary.
//!
//! ## Example
//!
//! ```
//! use combined_progress::{CombinedProgress, Progress};
//!
//! let combined = CombinedProgress::<u32>::new();
//! let a = Progress::new("a");
//! let b = Progress::new("b");
//! combined.attach(&a)?;
//! combined.attach(&b)?;
//!
//! a.report(4);
//! b.report(6);
//! assert_eq!(combined.value(), 5);
//! # Ok::<(), combined_progress::ProgressError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod builder;
pub mod combined;
pub mod error;
pub mod progress;
pub mod simulation;
pub mod value;

pub use builder::CombinedProgressBuilder;
pub use combined::{CombinedProgress, CombinedSnapshot, SourceSnapshot};
pub use error::ProgressError;
pub use progress::{Progress, SourceId, SubscriptionId};
pub use simulation::{SimulationConfig, simulate};
pub use value::ProgressValue;
