//! # ctgwatch-adapters
//!
//! Adapters between ctgwatch and the outside world.
//!
//! ## Supported Sources
//!
//! - **TRC files** ([`trc`]) - Binary monitor exports, decoded into patient
//!   id, start time and three sample channels
//! - **Assessment executable** (`assessment` feature, on by default) - Writes
//!   CSV inputs, runs the risk-computation program under a bounded worker
//!   pool and parses its line-oriented output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ctgwatch_adapters::trc;
//! use ctgwatch_types::Channel;
//!
//! let bytes = std::fs::read("20211201161653.trc")?;
//! let data = trc::decode(&bytes)?;
//!
//! for sample in data.samples(Channel::HeartRate).take(5) {
//!     println!("{} {}", sample.observed_at, sample.value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod trc;

#[cfg(feature = "assessment")]
pub mod assessment;

pub use error::AdapterError;
pub use trc::{TrcData, TrcFormat};

// Re-export types for convenience
pub use ctgwatch_types::{Channel, Parameters, Sample};
