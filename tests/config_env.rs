//! Environment overrides, kept in their own test binary so the variables
//! cannot leak into other configuration tests.

use std::env;
use std::io::Write;
use std::time::Duration;

use ctgwatch::Settings;
use ctgwatch_core::AlertSettings;
use tempfile::NamedTempFile;

#[test]
fn test_environment_overrides_file() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(
        file,
        "[alert]\nrisk_threshold = 2\nbacking_window = \"30m\"\n\n[assessment]\nworkers = 2"
    )
    .unwrap();

    env::set_var("CTGWATCH__ALERT__RISK_THRESHOLD", "4");
    env::set_var("CTGWATCH__ALERT__SILENCE_DURATION", "10m");
    env::set_var("CTGWATCH__ASSESSMENT__WORKERS", "8");

    let loaded = Settings::load(Some(file.path()));

    env::remove_var("CTGWATCH__ALERT__RISK_THRESHOLD");
    env::remove_var("CTGWATCH__ALERT__SILENCE_DURATION");
    env::remove_var("CTGWATCH__ASSESSMENT__WORKERS");

    let settings = loaded.unwrap();
    let alert = AlertSettings::from(&settings.alert);
    assert_eq!(alert.risk_threshold.get(), 4);
    assert_eq!(alert.silence_duration, Duration::from_secs(600));
    assert_eq!(alert.backing_window, Duration::from_secs(1800));
    assert_eq!(settings.assessment.workers, 8);

    // Out-of-range values are rejected from the environment too.
    env::set_var("CTGWATCH__ALERT__RISK_THRESHOLD", "9");
    let rejected = Settings::load(None);
    env::remove_var("CTGWATCH__ALERT__RISK_THRESHOLD");
    assert!(rejected.is_err());
}
