//! Adapter for the external risk-assessment executable.
//!
//! The executable reads two CSV files (heart rate and uterine activity,
//! timestamps in Unix milliseconds) and a parameters file, and prints one
//! line per detected parameter:
//!
//! ```text
//! Data Name: <hr.csv> <uc.csv> <params> <bpm>
//! 1638375413000 - 1638375473000 Baseline-NORMAL 140
//! 1638375413000 - 1638375473000 BaselineVariability-NORMAL 8
//! 1638375473000 - 1638375503000 Acceleration
//! Data End
//! ```
//!
//! Consecutive lines sharing a range form one [`AssessmentItem`].
//!
//! Runs are bounded by a fixed-size worker pool so unrelated measurements
//! proceed in parallel without spawning an unbounded number of processes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctgwatch_adapters::assessment::{AssessmentInput, AssessmentRunner};
//! use std::time::Duration;
//!
//! # async fn run(inputs: Vec<AssessmentInput>) {
//! let runner = AssessmentRunner::builder()
//!     .root("/opt/ctg-assessment")
//!     .command("bin/assess")
//!     .parameters("conf/params.json")
//!     .workers(4)
//!     .timeout(Duration::from_secs(120))
//!     .build();
//!
//! for (id, result) in runner.run_all(inputs, chrono::Utc::now()).await {
//!     println!("{}: {:?}", id, result.map(|items| items.len()));
//! }
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use ctgwatch_types::{MeasurementId, ParamValue, Parameters, Sample};

use crate::AdapterError;

const END_OF_DATA: &str = "Data End";

/// Samples and context handed to the executable for one measurement.
#[derive(Debug, Clone)]
pub struct AssessmentInput {
    pub measurement_id: MeasurementId,
    pub heart_rates: Vec<Sample>,
    pub tocos: Vec<Sample>,
    /// Baseline bpm of the measurement's latest diagnosis.
    pub baseline_bpm: Option<i64>,
}

/// One range reported by the executable with all of its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentItem {
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    pub parameters: Parameters,
}

/// Runs the assessment executable under a bounded worker pool.
#[derive(Debug, Clone)]
pub struct AssessmentRunner {
    root: PathBuf,
    command: PathBuf,
    parameters: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl AssessmentRunner {
    /// Create a new builder for configuring the runner.
    pub fn builder() -> AssessmentRunnerBuilder {
        AssessmentRunnerBuilder::default()
    }

    /// Directory that receives the CSV inputs for a run at `time`.
    pub fn input_dir(&self, time: DateTime<Utc>) -> PathBuf {
        self.root
            .join("input")
            .join(time.format("%Y").to_string())
            .join(time.format("%m").to_string())
            .join(time.format("%d").to_string())
    }

    /// Write the heart-rate and uterine-activity CSV files for one input.
    pub async fn write_inputs(
        &self,
        input: &AssessmentInput,
        time: DateTime<Utc>,
    ) -> Result<(PathBuf, PathBuf), AdapterError> {
        let dir = self.input_dir(time);
        tokio::fs::create_dir_all(&dir).await?;

        let stem = format!("{}-{}", time.format("%Y%m%d-%H%M%S"), input.measurement_id.0);
        let hr_path = dir.join(format!("{}-HR.csv", stem));
        let uc_path = dir.join(format!("{}-UC.csv", stem));

        tokio::fs::write(&hr_path, samples_csv("F1", &input.heart_rates)?).await?;
        tokio::fs::write(&uc_path, samples_csv("UC", &input.tocos)?).await?;

        Ok((hr_path, uc_path))
    }

    /// Assess one measurement, waiting for a free worker first.
    pub async fn run(
        &self,
        input: &AssessmentInput,
        time: DateTime<Utc>,
    ) -> Result<Vec<AssessmentItem>, AdapterError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AdapterError::PoolClosed)?;

        let (hr_path, uc_path) = self.write_inputs(input, time).await?;
        let bpm = input
            .baseline_bpm
            .map_or_else(|| "null".to_string(), |b| b.to_string());

        debug!(measurement = %input.measurement_id, "Starting assessment process");

        let child = Command::new(self.root.join(&self.command))
            .arg(&hr_path)
            .arg(&uc_path)
            .arg(self.root.join(&self.parameters))
            .arg(bpm)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AdapterError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(AdapterError::ProcessFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let items = parse_output(&String::from_utf8_lossy(&output.stdout));
        debug!(
            measurement = %input.measurement_id,
            items = items.len(),
            "Assessment process finished"
        );
        Ok(items)
    }

    /// Assess many measurements concurrently, at most `workers` at a time.
    ///
    /// Results come back in completion order; one failure does not affect
    /// the others.
    pub async fn run_all(
        &self,
        inputs: Vec<AssessmentInput>,
        time: DateTime<Utc>,
    ) -> Vec<(MeasurementId, Result<Vec<AssessmentItem>, AdapterError>)> {
        let mut tasks = JoinSet::new();
        let mut ids = Vec::with_capacity(inputs.len());

        for input in inputs {
            let runner = self.clone();
            ids.push(input.measurement_id);
            tasks.spawn(async move {
                let result = runner.run(&input, time).await;
                (input.measurement_id, result)
            });
        }

        let mut results = Vec::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Assessment task aborted"),
            }
        }

        // Tasks that never reported still need an answer.
        for id in ids {
            if !results.iter().any(|(done, _)| *done == id) {
                results.push((
                    id,
                    Err(AdapterError::ProcessFailed {
                        status: "aborted".to_string(),
                        stderr: String::new(),
                    }),
                ));
            }
        }
        results
    }
}

/// Builder for [`AssessmentRunner`].
#[derive(Debug)]
pub struct AssessmentRunnerBuilder {
    root: PathBuf,
    command: PathBuf,
    parameters: PathBuf,
    workers: usize,
    timeout: Duration,
}

impl Default for AssessmentRunnerBuilder {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            command: PathBuf::from("assess"),
            parameters: PathBuf::from("parameters.json"),
            workers: 4,
            timeout: Duration::from_secs(120),
        }
    }
}

impl AssessmentRunnerBuilder {
    /// Directory holding the executable, its parameters and `input/`.
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Executable path, relative to the root.
    pub fn command(mut self, command: impl AsRef<Path>) -> Self {
        self.command = command.as_ref().to_path_buf();
        self
    }

    /// Parameters file path, relative to the root.
    pub fn parameters(mut self, parameters: impl AsRef<Path>) -> Self {
        self.parameters = parameters.as_ref().to_path_buf();
        self
    }

    /// Maximum number of concurrent processes (at least one).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Per-process time limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> AssessmentRunner {
        AssessmentRunner {
            root: self.root,
            command: self.command,
            parameters: self.parameters,
            timeout: self.timeout,
            permits: Arc::new(Semaphore::new(self.workers)),
        }
    }
}

fn samples_csv(column: &str, samples: &[Sample]) -> Result<Vec<u8>, AdapterError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["RecordTime", column])?;
    for sample in samples {
        writer.write_record([
            sample.observed_at.timestamp_millis().to_string(),
            sample.value.to_string(),
        ])?;
    }
    writer.into_inner().map_err(|e| AdapterError::Io(e.into_error()))
}

/// Parse the executable's stdout into items.
///
/// The first line is a banner and is skipped. Reading stops at
/// `Data End`. Malformed lines are logged and skipped.
pub fn parse_output(text: &str) -> Vec<AssessmentItem> {
    let mut items: Vec<AssessmentItem> = Vec::new();

    for line in text.lines().skip(1) {
        let line = line.trim_end();
        if line == END_OF_DATA {
            break;
        }

        let Some((from, until, name, value)) = parse_line(line) else {
            warn!(line, "Unexpected line in assessment output");
            continue;
        };

        match items.last_mut() {
            Some(item) if item.range_from == from && item.range_until == until => {
                item.parameters.insert(name, value);
            }
            _ => items.push(AssessmentItem {
                range_from: from,
                range_until: until,
                parameters: Parameters::new().with(name, value),
            }),
        }
    }

    items
}

/// `<from> - <until> [-] <name> [value]`
fn parse_line(line: &str) -> Option<(DateTime<Utc>, DateTime<Utc>, &str, ParamValue)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 || tokens[1] != "-" {
        return None;
    }

    let from = DateTime::<Utc>::from_timestamp_millis(tokens[0].parse().ok()?)?;
    let until = DateTime::<Utc>::from_timestamp_millis(tokens[2].parse().ok()?)?;

    let mut rest = &tokens[3..];
    if rest.len() >= 2 && rest[0] == "-" {
        rest = &rest[1..];
    }

    let name = *rest.first()?;
    if name == "-" {
        return None;
    }
    let value = rest.get(1).map_or(ParamValue::Null, |v| ParamValue::parse(v));
    Some((from, until, name, value))
}

/// Drop items that fall into the `cutoff` margin at either end of the
/// data window.
pub fn trim_cutoff(
    items: Vec<AssessmentItem>,
    window_from: DateTime<Utc>,
    window_until: DateTime<Utc>,
    cutoff: chrono::Duration,
) -> Vec<AssessmentItem> {
    if cutoff <= chrono::Duration::zero() {
        return items;
    }
    let from = window_from + cutoff;
    let until = window_until - cutoff;
    items
        .into_iter()
        .filter(|item| item.range_from >= from && item.range_until <= until)
        .collect()
}

/// Whether a channel holds enough samples to be worth assessing.
pub fn has_enough_data(samples: usize, data_seconds: i64, minimum_ratio: f64) -> bool {
    samples as f64 > data_seconds as f64 * minimum_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, 16, 0, 0).unwrap() + chrono::Duration::seconds(sec)
    }

    fn ms(sec: i64) -> i64 {
        at(sec).timestamp_millis()
    }

    #[test]
    fn test_parse_output_groups_by_range() {
        let text = format!(
            "Data Name: hr uc params null\n\
             {a} - {b} Baseline-NORMAL 140\n\
             {a} - {b} BaselineVariability-NORMAL 8\n\
             {b} - {c} Acceleration\n\
             {c} - {d} Risk 2.5\n\
             Data End\n\
             {d} - {e} Acceleration\n",
            a = ms(0),
            b = ms(60),
            c = ms(90),
            d = ms(120),
            e = ms(180),
        );

        let items = parse_output(&text);
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].range_from, at(0));
        assert_eq!(items[0].range_until, at(60));
        assert_eq!(items[0].parameters.int("Baseline-NORMAL"), Some(140));
        assert_eq!(items[0].parameters.int("BaselineVariability-NORMAL"), Some(8));

        assert_eq!(items[1].parameters.get("Acceleration"), Some(&ParamValue::Null));
        assert_eq!(items[2].parameters.get("Risk"), Some(&ParamValue::Float(2.5)));
    }

    #[test]
    fn test_parse_output_skips_malformed_lines() {
        let text = format!(
            "banner\n\
             garbage\n\
             x - {b} Acceleration\n\
             {a} + {b} Acceleration\n\
             {a} - {b} Deceleration-ED\n",
            a = ms(0),
            b = ms(30),
        );
        let items = parse_output(&text);
        assert_eq!(items.len(), 1);
        assert!(items[0].parameters.contains("Deceleration-ED"));
    }

    #[test]
    fn test_parse_line_accepts_dash_before_name() {
        let line = format!("{} - {} - Baseline-NORMAL 150", ms(0), ms(60));
        let (_, _, name, value) = parse_line(&line).unwrap();
        assert_eq!(name, "Baseline-NORMAL");
        assert_eq!(value, ParamValue::Int(150));
    }

    #[test]
    fn test_parse_line_rejects_missing_name() {
        assert!(parse_line(&format!("{} - {} -", ms(0), ms(60))).is_none());
        assert!(parse_line(&format!("{} - {} - -", ms(0), ms(60))).is_none());

        let text = format!(
            "Data Name: hr.csv uc.csv params.json null\n{} - {} -\n{} - {} Acceleration\nData End\n",
            ms(0),
            ms(60),
            ms(60),
            ms(90)
        );
        let items = parse_output(&text);
        assert_eq!(items.len(), 1);
        assert!(items[0].parameters.contains("Acceleration"));
    }

    #[test]
    fn test_trim_cutoff() {
        let item = |from, until| AssessmentItem {
            range_from: at(from),
            range_until: at(until),
            parameters: Parameters::new(),
        };
        let items = vec![item(0, 60), item(60, 120), item(120, 540), item(540, 600)];

        let trimmed = trim_cutoff(items.clone(), at(0), at(600), chrono::Duration::seconds(60));
        assert_eq!(trimmed, vec![item(60, 120), item(120, 540)]);

        let untouched = trim_cutoff(items.clone(), at(0), at(600), chrono::Duration::zero());
        assert_eq!(untouched, items);
    }

    #[test]
    fn test_has_enough_data() {
        assert!(has_enough_data(541, 600, 0.9));
        assert!(!has_enough_data(540, 600, 0.9));
        assert!(!has_enough_data(0, 600, 0.9));
    }

    #[test]
    fn test_builder_defaults() {
        let runner = AssessmentRunner::builder().build();
        assert_eq!(runner.root, PathBuf::from("."));
        assert_eq!(runner.timeout, Duration::from_secs(120));
        assert_eq!(runner.permits.available_permits(), 4);

        let runner = AssessmentRunner::builder().workers(0).build();
        assert_eq!(runner.permits.available_permits(), 1);
    }

    fn input(id: u64) -> AssessmentInput {
        AssessmentInput {
            measurement_id: MeasurementId(id),
            heart_rates: vec![Sample::new(140, at(0)), Sample::new(142, at(1))],
            tocos: vec![Sample::new(10, at(0))],
            baseline_bpm: Some(140),
        }
    }

    #[tokio::test]
    async fn test_write_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = AssessmentRunner::builder().root(dir.path()).build();

        let (hr, uc) = runner.write_inputs(&input(7), at(0)).await.unwrap();

        assert_eq!(
            hr,
            dir.path().join("input/2021/12/01/20211201-160000-7-HR.csv")
        );
        let hr_text = std::fs::read_to_string(&hr).unwrap();
        assert_eq!(
            hr_text,
            format!("RecordTime,F1\n{},140\n{},142\n", ms(0), ms(1))
        );
        let uc_text = std::fs::read_to_string(&uc).unwrap();
        assert!(uc_text.starts_with("RecordTime,UC\n"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("assess.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_parses_process_output() {
        let dir = tempfile::tempdir().unwrap();
        script(
            dir.path(),
            &format!(
                "echo \"Data Name: $1 $2 $3 $4\"\n\
                 echo \"{a} - {b} Baseline-NORMAL $4\"\n\
                 echo \"{a} - {b} BaselineVariability-NORMAL 8\"\n\
                 echo \"Data End\"",
                a = ms(0),
                b = ms(60)
            ),
        );
        let runner = AssessmentRunner::builder()
            .root(dir.path())
            .command("assess.sh")
            .build();

        let items = runner.run(&input(1), at(0)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].parameters.int("Baseline-NORMAL"), Some(140));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "echo boom >&2\nexit 3");
        let runner = AssessmentRunner::builder()
            .root(dir.path())
            .command("assess.sh")
            .build();

        match runner.run(&input(1), at(0)).await {
            Err(AdapterError::ProcessFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected ProcessFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "sleep 5");
        let runner = AssessmentRunner::builder()
            .root(dir.path())
            .command("assess.sh")
            .timeout(Duration::from_millis(100))
            .build();

        assert!(matches!(
            runner.run(&input(1), at(0)).await,
            Err(AdapterError::Timeout(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_all_reports_every_measurement() {
        let dir = tempfile::tempdir().unwrap();
        script(
            dir.path(),
            &format!("echo banner\necho \"{} - {} Acceleration\"", ms(0), ms(30)),
        );
        let runner = AssessmentRunner::builder()
            .root(dir.path())
            .command("assess.sh")
            .workers(2)
            .build();

        let mut results = runner
            .run_all(vec![input(1), input(2), input(3)], at(0))
            .await;
        results.sort_by_key(|(id, _)| *id);

        let ids: Vec<_> = results.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().len() == 1));
        assert_eq!(runner.permits.available_permits(), 2);
    }
}
