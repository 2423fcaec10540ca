use crate::Collector;
use anyhow::{Context, Result};
pub use oxport_common::snapshot::{FilterUsage, ProcessSnapshot};
use oxport_common::types::ProcessFilter;
use regex::Regex;
use std::collections::BTreeMap;
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};

/// Minimal view of one process, decoupled from `sysinfo` for aggregation.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub name: String,
    pub state: &'static str,
    pub resident_memory: u64,
    pub cpu_time_ms: u64,
}

pub struct ProcessCollector {
    system: System,
    filters: Vec<(String, Regex)>,
}

impl ProcessCollector {
    /// # Errors
    ///
    /// Returns an error if any filter regex does not compile.
    pub fn new(filters: &[ProcessFilter]) -> Result<Self> {
        let filters = compile_filters(filters)?;
        Ok(Self {
            system: System::new(),
            filters,
        })
    }
}

impl Collector for ProcessCollector {
    type Output = ProcessSnapshot;

    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<ProcessSnapshot> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let processes: Vec<ProcessInfo> = self
            .system
            .processes()
            .values()
            .map(|p| ProcessInfo {
                name: p.name().to_string_lossy().into_owned(),
                state: state_name(p.status()),
                resident_memory: p.memory(),
                cpu_time_ms: p.accumulated_cpu_time(),
            })
            .collect();

        Ok(summarize(&processes, &self.filters))
    }
}

pub fn compile_filters(filters: &[ProcessFilter]) -> Result<Vec<(String, Regex)>> {
    filters
        .iter()
        .map(|f| {
            let regex = Regex::new(&f.regex)
                .with_context(|| format!("Invalid regex for process filter '{}'", f.process))?;
            Ok((f.process.clone(), regex))
        })
        .collect()
}

/// Aggregate counts per state and per-filter usage over a process list.
pub fn summarize(processes: &[ProcessInfo], filters: &[(String, Regex)]) -> ProcessSnapshot {
    let mut by_state = BTreeMap::new();
    for p in processes {
        *by_state.entry(p.state.to_string()).or_insert(0) += 1;
    }

    let filters = filters
        .iter()
        .map(|(process, regex)| {
            let mut usage = FilterUsage {
                process: process.clone(),
                matched: 0,
                resident_memory: 0,
                cpu_time_secs: 0.0,
            };
            for p in processes.iter().filter(|p| regex.is_match(&p.name)) {
                usage.matched += 1;
                usage.resident_memory += p.resident_memory;
                usage.cpu_time_secs += p.cpu_time_ms as f64 / 1000.0;
            }
            usage
        })
        .collect();

    ProcessSnapshot {
        total: processes.len(),
        by_state,
        filters,
    }
}

pub fn state_name(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Run => "running",
        ProcessStatus::Idle => "idle",
        ProcessStatus::Sleep => "sleeping",
        ProcessStatus::UninterruptibleDiskSleep => "uninterruptible_disk_sleep",
        ProcessStatus::Zombie => "zombie",
        ProcessStatus::Stop => "stopped",
        ProcessStatus::Tracing => "tracing_stop",
        ProcessStatus::Dead => "dead",
        ProcessStatus::Wakekill => "wakekill",
        ProcessStatus::Waking => "waking",
        ProcessStatus::Parked => "parked",
        _ => "unknown",
    }
}
