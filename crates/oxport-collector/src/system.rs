use crate::Collector;
use anyhow::{anyhow, Context, Result};
pub use oxport_common::snapshot::SystemSnapshot;
use std::process::Command;
use sysinfo::System;

pub struct SystemCollector;

impl SystemCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemCollector {
    type Output = SystemSnapshot;

    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self) -> Result<SystemSnapshot> {
        let hostname = System::host_name();
        if hostname.is_none() {
            tracing::warn!("Failed to read hostname");
        }

        let uname_checksum = match uname() {
            Ok(output) => Some(checksum(&output)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read uname");
                None
            }
        };

        let login_users = match login_users() {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count login users");
                None
            }
        };

        Ok(SystemSnapshot {
            hostname_checksum: hostname.as_deref().map(checksum),
            hostname,
            uname_checksum,
            uptime_seconds: System::uptime() as f64,
            login_users,
        })
    }
}

/// CRC32 (IEEE) of a string, as a gauge value.
pub fn checksum(value: &str) -> f64 {
    crc32fast::hash(value.as_bytes()) as f64
}

fn uname() -> Result<String> {
    let output = Command::new("uname")
        .arg("-a")
        .output()
        .context("Failed to execute 'uname -a'")?;
    if !output.status.success() {
        return Err(anyhow!("'uname -a' exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn login_users() -> Result<usize> {
    let output = Command::new("who")
        .arg("-q")
        .output()
        .context("Failed to execute 'who -q'")?;
    parse_who_count(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the `# users=N` trailer of `who -q`.
pub fn parse_who_count(output: &str) -> Result<usize> {
    let (_, count) = output
        .trim()
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("invalid format in 'who -q' output"))?;
    count
        .trim()
        .parse()
        .context("Failed to parse number of users")
}
