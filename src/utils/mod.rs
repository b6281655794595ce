//! Small shared utilities.

pub mod clock;

pub use clock::{Clock, SystemClock};
