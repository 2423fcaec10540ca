//! Typed metric groups, one per collector, that reconcile a collector's
//! snapshot into the store.

use crate::error::Result;
use crate::{lock, GaugeFamily, MetricStore};
use oxport_common::snapshot::{FileHash, LastRunReport, ProcessSnapshot, SystemSnapshot};
use oxport_common::types::{InventoryPolicy, InventorySnapshot, ReachabilityResult};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

fn bool_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

pub struct ReachabilityMetrics {
    network_target: Arc<GaugeFamily>,
}

impl ReachabilityMetrics {
    pub fn register(store: &MetricStore) -> Result<Self> {
        Ok(Self {
            network_target: store.gauge_family(
                "network_target",
                "Network port availability",
                &["host", "port", "protocol"],
            )?,
        })
    }

    pub fn apply(&self, results: &[ReachabilityResult]) -> Result<()> {
        for result in results {
            let port = result.target.port.to_string();
            let protocol = result.target.protocol.to_string();
            self.network_target.set(
                &[result.target.host.as_str(), port.as_str(), protocol.as_str()],
                bool_value(result.is_open),
            )?;
        }
        Ok(())
    }
}

pub struct ProcessMetrics {
    count: Arc<GaugeFamily>,
    running_status: Arc<GaugeFamily>,
    memory_resident: Arc<GaugeFamily>,
    cpu_time: Arc<GaugeFamily>,
    /// States reported in earlier cycles; reset to zero when they disappear.
    seen_states: Mutex<BTreeSet<String>>,
}

impl ProcessMetrics {
    pub fn register(store: &MetricStore) -> Result<Self> {
        Ok(Self {
            count: store.gauge_family("processes_count", "Number of processes", &["type"])?,
            running_status: store.gauge_family(
                "process_running_status",
                "Status of process (running or not)",
                &["process"],
            )?,
            memory_resident: store.gauge_family(
                "process_memory_resident",
                "Resident memory of processes in bytes",
                &["process"],
            )?,
            cpu_time: store.gauge_family(
                "process_cpu_time_total",
                "CPU time consumed by processes in seconds",
                &["process"],
            )?,
            seen_states: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn apply(&self, snapshot: &ProcessSnapshot) -> Result<()> {
        self.count.set(&["all"], snapshot.total as f64)?;

        let mut seen = lock(&self.seen_states);
        for state in seen.iter() {
            if !snapshot.by_state.contains_key(state) {
                self.count.set(&[state.as_str()], 0.0)?;
            }
        }
        for (state, count) in &snapshot.by_state {
            self.count.set(&[state.as_str()], *count as f64)?;
            seen.insert(state.clone());
        }
        drop(seen);

        for usage in &snapshot.filters {
            let process = [usage.process.as_str()];
            self.running_status.set(&process, bool_value(usage.running()))?;
            self.memory_resident.set(&process, usage.resident_memory as f64)?;
            self.cpu_time.set(&process, usage.cpu_time_secs)?;
        }
        Ok(())
    }
}

pub struct SystemMetrics {
    hostname_checksum: Arc<GaugeFamily>,
    uname_checksum: Arc<GaugeFamily>,
    hostname: Arc<GaugeFamily>,
    uptime: Arc<GaugeFamily>,
    login_users: Arc<GaugeFamily>,
}

impl SystemMetrics {
    pub fn register(store: &MetricStore) -> Result<Self> {
        Ok(Self {
            hostname_checksum: store.gauge_family("hostname_checksum", "Checksum of hostname", &[])?,
            uname_checksum: store.gauge_family("uname_checksum", "Checksum of uname", &[])?,
            hostname: store.gauge_family("hostname", "Hostname of the machine", &["hostname"])?,
            uptime: store.gauge_family("uptime_seconds", "Uptime of the machine in seconds", &[])?,
            login_users: store.gauge_family("login_users_count", "Number of login users", &[])?,
        })
    }

    /// Fields missing from the snapshot keep their previous value.
    pub fn apply(&self, snapshot: &SystemSnapshot) -> Result<()> {
        if let Some(hostname) = &snapshot.hostname {
            self.hostname.set_identity(&[hostname.as_str()], 1.0)?;
        }
        if let Some(checksum) = snapshot.hostname_checksum {
            self.hostname_checksum.set(&[], checksum)?;
        }
        if let Some(checksum) = snapshot.uname_checksum {
            self.uname_checksum.set(&[], checksum)?;
        }
        if let Some(users) = snapshot.login_users {
            self.login_users.set(&[], users as f64)?;
        }
        self.uptime.set(&[], snapshot.uptime_seconds)?;
        Ok(())
    }
}

pub struct FileHashMetrics {
    file_hash: Arc<GaugeFamily>,
}

impl FileHashMetrics {
    pub fn register(store: &MetricStore) -> Result<Self> {
        Ok(Self {
            file_hash: store.gauge_family("file_hash", "SHA256 hash of files", &["file"])?,
        })
    }

    pub fn apply(&self, hashes: &[FileHash]) -> Result<()> {
        for hash in hashes {
            self.file_hash.set(&[hash.file.as_str()], hash.hash)?;
        }
        Ok(())
    }
}

pub struct PuppetMetrics {
    last_compile_timestamp: Arc<GaugeFamily>,
    last_compile_status: Arc<GaugeFamily>,
}

impl PuppetMetrics {
    pub fn register(store: &MetricStore) -> Result<Self> {
        Ok(Self {
            last_compile_timestamp: store.gauge_family(
                "puppet_catalog_last_compile_timestamp",
                "Timestamp of the last puppet catalog compile",
                &[],
            )?,
            last_compile_status: store.gauge_family(
                "puppet_catalog_last_compile_status",
                "Status of the last puppet catalog compile",
                &[],
            )?,
        })
    }

    pub fn apply(&self, report: &LastRunReport) -> Result<()> {
        self.last_compile_timestamp
            .set(&[], report.configuration_version as f64)?;
        self.last_compile_status
            .set(&[], bool_value(report.transaction_completed))?;
        Ok(())
    }
}

/// What one inventory reconciliation changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InventoryOutcome {
    pub written: usize,
    pub evicted: usize,
    pub pruned: usize,
}

/// Inventory series for one provider, reconciled according to its policy.
pub struct InventoryMetrics {
    family: Arc<GaugeFamily>,
    policy: InventoryPolicy,
}

impl InventoryMetrics {
    pub fn register(
        store: &MetricStore,
        name: &str,
        help: &str,
        label_keys: &[&str],
        policy: InventoryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            family: store.gauge_family(name, help, label_keys)?,
            policy,
        })
    }

    pub fn policy(&self) -> InventoryPolicy {
        self.policy
    }

    pub fn apply(&self, snapshot: &InventorySnapshot) -> Result<InventoryOutcome> {
        let mut outcome = InventoryOutcome::default();

        for entity in &snapshot.entities {
            let values: Vec<String> = self
                .family
                .label_keys()
                .iter()
                .map(|key| entity.label_value(key))
                .collect();
            let labels: Vec<&str> = values.iter().map(String::as_str).collect();

            if self.policy.evicts_changed() {
                if self.family.set_keyed(&entity.id, &labels, 1.0)? {
                    outcome.evicted += 1;
                }
            } else {
                self.family.set(&labels, 1.0)?;
            }
            outcome.written += 1;
        }

        if self.policy == InventoryPolicy::PruneAbsent {
            if snapshot.complete {
                let present: HashSet<String> =
                    snapshot.entities.iter().map(|e| e.id.clone()).collect();
                outcome.pruned = self.family.retain_keys(&present);
            } else {
                tracing::warn!(
                    metric = %self.family.name(),
                    "Skipping prune of absent entities after a partial inventory cycle"
                );
            }
        }
        Ok(outcome)
    }

    pub fn series_count(&self) -> usize {
        self.family.series_count()
    }
}
