//! Statistics building blocks shared by the firehose crates.
//!
//! Attention: nothing in here may read a clock. Every time-dependent call takes
//! an explicit `now` so that the live graph, frozen snapshots and tests all see
//! exactly the same numbers for the same inputs.

pub mod capped_hash_map;
pub mod timeseries_stats;

pub use capped_hash_map::{CapacityExceeded, CappedHashMap};
pub use timeseries_stats::{MultiWindowTracker, SlidingWindowTracker, WindowTotals};
