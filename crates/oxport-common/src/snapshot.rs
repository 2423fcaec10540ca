//! Per-cycle readings produced by the host collectors and exported by the
//! registry.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Process table summary for one cycle.
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    pub total: usize,
    /// Process count per scheduler state (`running`, `sleeping`, ...).
    pub by_state: BTreeMap<String, usize>,
    pub filters: Vec<FilterUsage>,
}

/// Aggregated usage of the processes matched by one configured filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterUsage {
    pub process: String,
    pub matched: usize,
    pub resident_memory: u64,
    pub cpu_time_secs: f64,
}

impl FilterUsage {
    pub fn running(&self) -> bool {
        self.matched > 0
    }
}

/// Host identity and session state. Each field is read independently; a
/// failed read leaves that field `None` for the cycle.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub hostname: Option<String>,
    pub hostname_checksum: Option<f64>,
    pub uname_checksum: Option<f64>,
    pub uptime_seconds: f64,
    pub login_users: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileHash {
    pub file: String,
    pub hash: f64,
}

/// Fields of the puppet last-run report exposed as metrics.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LastRunReport {
    #[serde(default)]
    pub configuration_version: i64,
    #[serde(default)]
    pub transaction_completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_usage_should_be_running_when_anything_matched() {
        let mut usage = FilterUsage {
            process: "web".to_string(),
            matched: 0,
            resident_memory: 0,
            cpu_time_secs: 0.0,
        };
        assert!(!usage.running());
        usage.matched = 1;
        assert!(usage.running());
    }

    #[test]
    fn last_run_report_should_default_missing_fields() {
        let report: LastRunReport =
            serde_json::from_str(r#"{"configuration_version": 1712}"#).unwrap();
        assert_eq!(report.configuration_version, 1712);
        assert!(!report.transaction_completed);
    }
}
