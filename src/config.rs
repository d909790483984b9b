//! Layered configuration.
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! `CTGWATCH__`-prefixed environment variables (`__` separates sections):
//!
//! ```toml
//! state_file = "ctgwatch-state.json"
//!
//! [alert]
//! risk_threshold = 3
//! backing_window = "60m"
//! silence_duration = "5m"
//!
//! [assessment]
//! root = "/opt/ctg-assessment"
//! command = "bin/assess"
//! duration = "10m"
//! workers = 4
//! ```
//!
//! ```bash
//! CTGWATCH__ALERT__RISK_THRESHOLD=4 ctgwatch unread --hospital 1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use ctgwatch_adapters::assessment::AssessmentRunner;
use ctgwatch_core::measurement::AssessmentWindow;
use ctgwatch_core::AlertSettings;
use ctgwatch_types::RiskLevel;

use crate::duration::human;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CTGWATCH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub alert: AlertConfig,
    pub assessment: AssessmentConfig,
    /// JSON file holding the stored records and samples.
    pub state_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alert: AlertConfig::default(),
            assessment: AssessmentConfig::default(),
            state_file: PathBuf::from("ctgwatch-state.json"),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }
}

/// Alert thresholds and windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub risk_threshold: RiskLevel,
    #[serde(with = "human")]
    pub backing_window: Duration,
    #[serde(with = "human")]
    pub execution_interval: Duration,
    #[serde(with = "human")]
    pub silence_duration: Duration,
    #[serde(with = "human")]
    pub measurement_recency: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let defaults = AlertSettings::default();
        Self {
            risk_threshold: defaults.risk_threshold,
            backing_window: defaults.backing_window,
            execution_interval: defaults.execution_interval,
            silence_duration: defaults.silence_duration,
            measurement_recency: defaults.measurement_recency,
        }
    }
}

impl From<&AlertConfig> for AlertSettings {
    fn from(c: &AlertConfig) -> Self {
        AlertSettings {
            risk_threshold: c.risk_threshold,
            backing_window: c.backing_window,
            execution_interval: c.execution_interval,
            silence_duration: c.silence_duration,
            measurement_recency: c.measurement_recency,
        }
    }
}

/// The external assessment executable and its scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Directory holding the executable, its parameters and `input/`.
    pub root: PathBuf,
    /// Executable, relative to `root`.
    pub command: PathBuf,
    /// Parameters file, relative to `root`.
    pub parameters: PathBuf,
    pub algorithm: String,
    pub version: String,
    /// Length of assessed data.
    #[serde(with = "human")]
    pub duration: Duration,
    /// Minimum time between two assessments of one measurement.
    #[serde(with = "human")]
    pub interval: Duration,
    /// Margin at both ends of the data window whose results are dropped.
    #[serde(with = "human")]
    pub cutoff: Duration,
    /// How far behind the diagnosis time the window ends.
    #[serde(with = "human")]
    pub delay: Duration,
    pub workers: usize,
    #[serde(with = "human")]
    pub timeout: Duration,
    /// Fraction of expected one-per-second samples a channel must exceed.
    pub minimum_data_ratio: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            command: PathBuf::from("assess"),
            parameters: PathBuf::from("parameters.json"),
            algorithm: "ctg-assess".to_string(),
            version: "1".to_string(),
            duration: Duration::from_secs(10 * 60),
            interval: Duration::from_secs(60),
            cutoff: Duration::ZERO,
            delay: Duration::ZERO,
            workers: 4,
            timeout: Duration::from_secs(120),
            minimum_data_ratio: 0.9,
        }
    }
}

impl AssessmentConfig {
    /// `name:version`, recorded on every diagnosis the algorithm produces.
    pub fn algorithm_id(&self) -> String {
        format!("{}:{}", self.algorithm, self.version)
    }

    pub fn window(&self, diagnosis_time: DateTime<Utc>) -> AssessmentWindow {
        AssessmentWindow::new(
            diagnosis_time,
            self.duration,
            self.cutoff,
            self.delay,
            self.interval,
        )
    }

    pub fn runner(&self) -> AssessmentRunner {
        AssessmentRunner::builder()
            .root(&self.root)
            .command(&self.command)
            .parameters(&self.parameters)
            .workers(self.workers)
            .timeout(self.timeout)
            .build()
    }
}
