//! # ctgwatch
//!
//! Command-line front end for the fetal-monitoring pipeline: imports TRC
//! recordings, registers diagnoses, drives the external assessment
//! executable and answers alert queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          ctgwatch                            │
//! │  ┌──────────┐    ┌───────────┐    ┌──────────────────────┐  │
//! │  │ commands │───▶│  assess   │───▶│ ctgwatch-adapters    │  │
//! │  │  (CLI)   │    │ (one run) │    │ (trc, assessment)    │  │
//! │  └────┬─────┘    └─────┬─────┘    └──────────────────────┘  │
//! │       │                │                                    │
//! │       ▼                ▼                                    │
//! │  ┌──────────┐    ┌───────────────────────────────────────┐  │
//! │  │  state   │───▶│ ctgwatch-core (compose, timeline,     │  │
//! │  │  (JSON)  │    │ alert, measurement, store)            │  │
//! │  └──────────┘    └───────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`commands`]**: clap subcommands, one per pipeline operation
//! - **[`assess`]**: a single scheduled assessment pass
//! - **[`config`]**: layered settings from defaults, TOML and environment
//! - **[`state`]**: the JSON file holding stored records and samples
//! - **[`duration`]**: human-readable durations (`"5m"`, `"250ms"`)
//!
//! ## Usage
//!
//! ```bash
//! # Import a recording and look at its timeline
//! ctgwatch import 20211201161653.trc --hospital 1
//! ctgwatch timeline --measurement 1
//!
//! # Run the assessment executable over every measurement that is due
//! ctgwatch --config ctgwatch.toml assess
//!
//! # Poll for new alerts
//! ctgwatch unread --hospital 1 --seen 42
//! ```

pub mod assess;
pub mod commands;
pub mod config;
pub mod duration;
pub mod state;

pub use assess::{run_assessment, AssessmentReport};
pub use config::Settings;
pub use state::State;
