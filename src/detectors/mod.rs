//! Signal detectors
//!
//! - **Decline-rebound**: volatility-normalized decline followed by a rebound,
//!   at most one signal per day.
//! - **Triangle breakout**: range contraction followed by a large daily move.

pub mod helpers;

pub mod decline_rebound;
pub mod trend;
pub mod triangle;

// Re-export all detectors for convenience
pub use decline_rebound::*;
pub use helpers::*;
pub use trend::*;
pub use triangle::*;

pub(crate) use decline_rebound::check_aligned;
