//! Latest-value metric store backing the scrape endpoint.
//!
//! A [`MetricStore`] owns one Prometheus [`Registry`]. Each metric name maps
//! to a [`GaugeFamily`] whose label keys are fixed at registration. Families
//! lock independently, so collectors writing different families never wait on
//! each other, and a scrape only reads.
//!
//! Two update modes are supported:
//!
//! - overwrite ([`GaugeFamily::set`]): the value for a label set is replaced;
//! - identity replace ([`GaugeFamily::set_keyed`]): the family remembers the
//!   label set last written for an identity key and evicts it when a new
//!   label set arrives for the same key.

pub mod error;
pub mod metrics;

use error::{RegistryError, Result};
use prometheus::core::Collector;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identity key used by families with a single identity (e.g. `hostname`).
pub const SINGULAR_IDENTITY: &str = "";

#[derive(Default)]
pub struct MetricStore {
    registry: Registry,
    families: Mutex<HashMap<String, Arc<GaugeFamily>>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gauge family, or return the existing one when the name and
    /// label keys match a previous registration.
    pub fn gauge_family(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> Result<Arc<GaugeFamily>> {
        let mut families = lock(&self.families);
        if let Some(existing) = families.get(name) {
            if existing.label_keys == label_keys {
                return Ok(Arc::clone(existing));
            }
            return Err(RegistryError::LabelKeys {
                metric: name.to_string(),
                expected: existing.label_keys.clone(),
                actual: label_keys.iter().map(|k| k.to_string()).collect(),
            });
        }

        let gauges = GaugeVec::new(Opts::new(name, help), label_keys)?;
        self.registry.register(Box::new(gauges.clone()))?;

        let family = Arc::new(GaugeFamily {
            name: name.to_string(),
            label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
            gauges,
            identities: Mutex::new(HashMap::new()),
        });
        families.insert(name.to_string(), Arc::clone(&family));
        tracing::debug!(metric = name, labels = ?label_keys, "Registered gauge family");
        Ok(family)
    }

    /// Render every non-empty family in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn family_count(&self) -> usize {
        lock(&self.families).len()
    }
}

/// One metric name and all of its label combinations.
pub struct GaugeFamily {
    name: String,
    label_keys: Vec<String>,
    gauges: GaugeVec,
    /// Last label values written per identity key.
    identities: Mutex<HashMap<String, Vec<String>>>,
}

impl GaugeFamily {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    /// Overwrite the value of one label set.
    pub fn set(&self, labels: &[&str], value: f64) -> Result<()> {
        self.check_arity(labels.len())?;
        self.gauges.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }

    /// Identity replace for a family with a single identity.
    pub fn set_identity(&self, labels: &[&str], value: f64) -> Result<()> {
        self.set_keyed(SINGULAR_IDENTITY, labels, value)?;
        Ok(())
    }

    /// Set `labels` for identity `key`, first evicting the label set last
    /// written for that key if it differs. Returns whether a series was evicted.
    pub fn set_keyed(&self, key: &str, labels: &[&str], value: f64) -> Result<bool> {
        self.check_arity(labels.len())?;
        let mut identities = lock(&self.identities);

        let mut evicted = false;
        if let Some(previous) = identities.get(key) {
            if !same_labels(previous, labels) {
                evicted = self.remove_series(previous);
                tracing::debug!(metric = %self.name, key, "Evicted series with changed labels");
            }
        }

        self.gauges.get_metric_with_label_values(labels)?.set(value);
        identities.insert(key.to_string(), labels.iter().map(|l| l.to_string()).collect());
        Ok(evicted)
    }

    /// Drop every identity not in `keep` together with its series. Returns the
    /// number of identities removed.
    pub fn retain_keys(&self, keep: &HashSet<String>) -> usize {
        let mut identities = lock(&self.identities);
        let stale: Vec<String> = identities
            .keys()
            .filter(|k| !keep.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            if let Some(labels) = identities.remove(key) {
                self.remove_series(&labels);
            }
        }
        stale.len()
    }

    /// Remove one label set; returns `false` if it was not present.
    pub fn remove(&self, labels: &[&str]) -> bool {
        self.gauges.remove_label_values(labels).is_ok()
    }

    /// Number of label sets currently exported.
    pub fn series_count(&self) -> usize {
        self.gauges
            .collect()
            .iter()
            .map(|mf| mf.get_metric().len())
            .sum()
    }

    /// Current value for `labels`, without creating the series.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        if labels.len() != self.label_keys.len() {
            return None;
        }
        let wanted: BTreeMap<&str, &str> = self
            .label_keys
            .iter()
            .map(String::as_str)
            .zip(labels.iter().copied())
            .collect();

        self.gauges.collect().iter().find_map(|mf| {
            mf.get_metric().iter().find_map(|metric| {
                let actual: BTreeMap<&str, &str> = metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name(), pair.get_value()))
                    .collect();
                (actual == wanted).then(|| metric.get_gauge().get_value())
            })
        })
    }

    fn remove_series(&self, labels: &[String]) -> bool {
        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.remove(&values)
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        if actual != self.label_keys.len() {
            return Err(RegistryError::LabelArity {
                metric: self.name.clone(),
                expected: self.label_keys.len(),
                actual,
            });
        }
        Ok(())
    }
}

fn same_labels(previous: &[String], labels: &[&str]) -> bool {
    previous.len() == labels.len() && previous.iter().zip(labels).all(|(a, b)| a == b)
}

/// A panic in one writer must not take the scrape endpoint down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_should_keep_latest_value() {
        let store = MetricStore::new();
        let family = store.gauge_family("network_target", "reachability", &["host", "port", "protocol"]).unwrap();

        family.set(&["db", "5432", "TCP"], 3.0).unwrap();
        family.set(&["db", "5432", "TCP"], 7.0).unwrap();

        assert_eq!(family.series_count(), 1);
        assert_eq!(family.value(&["db", "5432", "TCP"]), Some(7.0));
    }

    #[test]
    fn singular_identity_change_should_evict_previous_series() {
        let store = MetricStore::new();
        let family = store.gauge_family("hostname", "host name", &["hostname"]).unwrap();

        family.set_identity(&["a"], 1.0).unwrap();
        family.set_identity(&["b"], 1.0).unwrap();

        assert_eq!(family.series_count(), 1);
        assert_eq!(family.value(&["b"]), Some(1.0));
        assert_eq!(family.value(&["a"]), None);
    }

    #[test]
    fn unchanged_identity_should_evict_nothing() {
        let store = MetricStore::new();
        let family = store.gauge_family("hostname", "host name", &["hostname"]).unwrap();

        family.set_identity(&["a"], 1.0).unwrap();
        assert!(!family.set_keyed(SINGULAR_IDENTITY, &["a"], 1.0).unwrap());
        assert_eq!(family.series_count(), 1);
    }

    #[test]
    fn keyed_identities_should_evict_independently() {
        let store = MetricStore::new();
        let family = store.gauge_family("yandex_cloud_server", "inventory", &["id", "name"]).unwrap();

        family.set_keyed("i-1", &["i-1", "web"], 1.0).unwrap();
        family.set_keyed("i-2", &["i-2", "db"], 1.0).unwrap();
        assert!(family.set_keyed("i-1", &["i-1", "web-renamed"], 1.0).unwrap());

        assert_eq!(family.series_count(), 2);
        assert_eq!(family.value(&["i-1", "web"]), None);
        assert_eq!(family.value(&["i-1", "web-renamed"]), Some(1.0));
        assert_eq!(family.value(&["i-2", "db"]), Some(1.0));
    }

    #[test]
    fn retain_keys_should_drop_absent_identities() {
        let store = MetricStore::new();
        let family = store.gauge_family("aws_cloud_server", "inventory", &["id"]).unwrap();
        family.set_keyed("i-1", &["i-1"], 1.0).unwrap();
        family.set_keyed("i-2", &["i-2"], 1.0).unwrap();

        let keep: HashSet<String> = ["i-2".to_string()].into_iter().collect();
        assert_eq!(family.retain_keys(&keep), 1);
        assert_eq!(family.series_count(), 1);
        assert_eq!(family.value(&["i-2"]), Some(1.0));
    }

    #[test]
    fn label_arity_mismatch_should_be_rejected() {
        let store = MetricStore::new();
        let family = store.gauge_family("file_hash", "hash", &["file"]).unwrap();

        let err = family.set(&["/etc/motd", "extra"], 1.0).unwrap_err();
        assert!(matches!(err, RegistryError::LabelArity { expected: 1, actual: 2, .. }));
        assert_eq!(family.series_count(), 0);
    }

    #[test]
    fn gauge_family_should_reuse_matching_registration() {
        let store = MetricStore::new();
        let first = store.gauge_family("file_hash", "hash", &["file"]).unwrap();
        let second = store.gauge_family("file_hash", "hash", &["file"]).unwrap();
        first.set(&["/etc/motd"], 5.0).unwrap();

        assert_eq!(second.value(&["/etc/motd"]), Some(5.0));
        assert_eq!(store.family_count(), 1);
        assert!(matches!(
            store.gauge_family("file_hash", "hash", &["file", "dir"]),
            Err(RegistryError::LabelKeys { .. })
        ));
    }

    #[test]
    fn gauge_family_should_reject_renamed_keys_of_same_count() {
        let store = MetricStore::new();
        store.gauge_family("network_target", "reachability", &["host", "port"]).unwrap();

        let err = store
            .gauge_family("network_target", "reachability", &["host", "protocol"])
            .err()
            .expect("renamed label keys must be rejected");
        assert!(err.to_string().contains("\"protocol\""));
        match err {
            RegistryError::LabelKeys { metric, expected, actual } => {
                assert_eq!(metric, "network_target");
                assert_eq!(expected, vec!["host", "port"]);
                assert_eq!(actual, vec!["host", "protocol"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn concurrent_writers_and_scrapes_should_keep_one_series_per_identity() {
        let store = MetricStore::new();
        let hostname = store.gauge_family("hostname", "host name", &["hostname"]).unwrap();
        let servers = store
            .gauge_family("hetzner_cloud_server", "inventory", &["id", "name"])
            .unwrap();

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let hostname = Arc::clone(&hostname);
                let servers = Arc::clone(&servers);
                scope.spawn(move || {
                    for round in 0..200 {
                        let name = format!("host-{writer}-{round}");
                        hostname.set_identity(&[name.as_str()], 1.0).unwrap();
                        servers.set_keyed("i-1", &["i-1", name.as_str()], 1.0).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    let text = store.render().unwrap();
                    assert!(text.lines().filter(|l| l.starts_with("hostname{")).count() <= 1);
                }
            });
        });

        assert_eq!(hostname.series_count(), 1);
        assert_eq!(servers.series_count(), 1);
        assert_eq!(lock(&hostname.identities).len(), 1);
    }

    #[test]
    fn render_should_emit_text_exposition() {
        let store = MetricStore::new();
        let uptime = store.gauge_family("uptime_seconds", "Uptime", &[]).unwrap();
        store.gauge_family("login_users_count", "Logins", &[]).unwrap();
        uptime.set(&[], 42.0).unwrap();

        let text = store.render().unwrap();
        assert!(text.contains("# TYPE uptime_seconds gauge"));
        assert!(text.contains("uptime_seconds 42"));
        assert!(!text.contains("login_users_count"));
    }
}
