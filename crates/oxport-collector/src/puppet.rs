use crate::Collector;
use anyhow::{Context, Result};
pub use oxport_common::snapshot::LastRunReport;
use std::path::{Path, PathBuf};

pub const DEFAULT_LAST_RUN_REPORT_PATH: &str =
    "/opt/puppetlabs/puppet/cache/state/last_run_report.yaml";

pub struct PuppetCollector {
    report_path: PathBuf,
}

impl PuppetCollector {
    pub fn new(report_path: PathBuf) -> Self {
        Self { report_path }
    }
}

impl Collector for PuppetCollector {
    type Output = LastRunReport;

    fn name(&self) -> &str {
        "puppet"
    }

    /// A missing or unparsable report is reported as never compiled
    /// (`0`, `false`) rather than as a collection failure.
    fn collect(&mut self) -> Result<LastRunReport> {
        match read_report(&self.report_path) {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::warn!(
                    path = %self.report_path.display(),
                    error = %e,
                    "Failed to parse puppet last run report"
                );
                Ok(LastRunReport::default())
            }
        }
    }
}

pub fn read_report(path: &Path) -> Result<LastRunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_report(&content)
}

/// Parse a report, ignoring the `!ruby/object:...` tags puppet emits.
pub fn parse_report(content: &str) -> Result<LastRunReport> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(content).context("Failed to parse YAML")?;
    while let serde_yaml::Value::Tagged(tagged) = value {
        value = tagged.value;
    }
    serde_yaml::from_value(value).context("Failed to decode last run report")
}
