//! # ctgwatch-types
//!
//! Core types for cardiotocography (CTG) monitoring. This crate defines the
//! vocabulary shared by the decoder, the risk engine and anything that
//! stores or displays a measurement's event timeline.
//!
//! ## Design Goals
//!
//! - **Closed vocabularies**: every clinical event name is an enum variant,
//!   never a free-form string once it has been classified
//! - **Optional serialization**: enable the `serde` feature to persist records
//! - **Unscored is not an error**: risk is `Option<RiskLevel>` everywhere
//!
//! ## Features
//!
//! - `serde`: serialization of every record type via serde
//!
//! ## Example
//!
//! ```rust
//! use ctgwatch_types::{BaselineType, CtgEvent, Parameters, RiskLevel};
//!
//! let params = Parameters::new()
//!     .with("Baseline-NORMAL", 140)
//!     .with("BaselineVariability-NORMAL", 10);
//!
//! assert_eq!(params.int("Baseline-NORMAL"), Some(140));
//! assert_eq!(BaselineType::from_name("Baseline-NORMAL"), Some(BaselineType::Normal));
//! assert!(RiskLevel::new(6).is_none());
//! ```

mod event;
mod params;
mod record;
mod risk;
mod sample;

pub use event::*;
pub use params::*;
pub use record::*;
pub use risk::*;
pub use sample::*;
