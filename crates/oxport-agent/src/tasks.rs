//! Scheduled tasks wiring collectors to their metric groups.

use crate::config::{AgentConfig, CloudConfig};
use crate::credentials::{self, Env};
use crate::scheduler::{random_startup_delay, PollTask};
use anyhow::{Context, Result};
use oxport_cloud::aws::AwsProvider;
use oxport_cloud::collector::InventoryCollector;
use oxport_cloud::hcloud::HetznerCloudProvider;
use oxport_cloud::hetzner::HetznerRobotProvider;
use oxport_cloud::yandex::YandexCloudProvider;
use oxport_cloud::{InventoryProvider, ProviderKind};
use oxport_collector::filehash::FileHashCollector;
use oxport_collector::network::ReachabilityProber;
use oxport_collector::process::ProcessCollector;
use oxport_collector::puppet::PuppetCollector;
use oxport_collector::system::SystemCollector;
use oxport_collector::Collector;
use oxport_common::types::Target;
use oxport_registry::metrics::{
    FileHashMetrics, InventoryMetrics, ProcessMetrics, PuppetMetrics, ReachabilityMetrics,
    SystemMetrics,
};
use oxport_registry::MetricStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Sink<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Runs a blocking [`Collector`] on the blocking pool and hands its snapshot
/// to a sink.
pub struct CollectorTask<C: Collector> {
    name: String,
    interval: Duration,
    collector: Arc<Mutex<C>>,
    sink: Sink<C::Output>,
}

impl<C> CollectorTask<C>
where
    C: Collector + 'static,
    C::Output: Send + 'static,
{
    pub fn new<F>(collector: C, interval: Duration, sink: F) -> Self
    where
        F: Fn(&C::Output) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: collector.name().to_string(),
            interval,
            collector: Arc::new(Mutex::new(collector)),
            sink: Box::new(sink),
        }
    }
}

#[async_trait::async_trait]
impl<C> PollTask for CollectorTask<C>
where
    C: Collector + 'static,
    C::Output: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<()> {
        let collector = Arc::clone(&self.collector);
        let output = tokio::task::spawn_blocking(move || {
            let mut collector = collector
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            collector.collect()
        })
        .await
        .context("Collector thread panicked")??;
        (self.sink)(&output)
    }
}

pub struct ReachabilityTask {
    interval: Duration,
    prober: ReachabilityProber,
    targets: Vec<Target>,
    metrics: ReachabilityMetrics,
}

impl ReachabilityTask {
    pub fn new(
        prober: ReachabilityProber,
        targets: Vec<Target>,
        interval: Duration,
        metrics: ReachabilityMetrics,
    ) -> Self {
        Self {
            interval,
            prober,
            targets,
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl PollTask for ReachabilityTask {
    fn name(&self) -> &str {
        "port"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<()> {
        let results = self.prober.check_targets(&self.targets).await;
        let open = results.iter().filter(|r| r.is_open).count();
        self.metrics.apply(&results)?;
        tracing::debug!(targets = results.len(), open, "Probed targets");
        Ok(())
    }
}

pub struct InventoryTask {
    kind: ProviderKind,
    interval: Duration,
    startup_delay: Option<Duration>,
    collector: InventoryCollector,
    metrics: InventoryMetrics,
}

impl InventoryTask {
    pub fn new(
        kind: ProviderKind,
        config: &CloudConfig,
        collector: InventoryCollector,
        metrics: InventoryMetrics,
    ) -> Self {
        Self {
            kind,
            interval: Duration::from_secs(config.interval_secs),
            startup_delay: config
                .random_sleep_before_start
                .then(random_startup_delay),
            collector,
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl PollTask for InventoryTask {
    fn name(&self) -> &str {
        self.kind.metric_name()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn startup_delay(&self) -> Option<Duration> {
        self.startup_delay
    }

    async fn run_cycle(&self) -> Result<()> {
        let snapshot = self.collector.collect().await;
        let outcome = self.metrics.apply(&snapshot)?;
        if snapshot.complete {
            tracing::info!(
                provider = %self.kind,
                entities = outcome.written,
                evicted = outcome.evicted,
                pruned = outcome.pruned,
                "Inventory updated"
            );
        } else {
            tracing::warn!(
                provider = %self.kind,
                entities = outcome.written,
                evicted = outcome.evicted,
                accounts = self.collector.account_count(),
                "Inventory updated from a partial cycle"
            );
        }
        Ok(())
    }
}

/// Build one task per enabled collector. Configuration and credential errors
/// are returned so the agent can refuse to start.
pub fn build_tasks(
    config: &AgentConfig,
    store: &MetricStore,
    env: &dyn Env,
) -> Result<Vec<Arc<dyn PollTask>>> {
    let mut tasks: Vec<Arc<dyn PollTask>> = Vec::new();

    if config.file_hash.enabled {
        let metrics = FileHashMetrics::register(store)?;
        tasks.push(Arc::new(CollectorTask::new(
            FileHashCollector::new(config.file_hash.files.clone()),
            Duration::from_secs(config.file_hash.interval_secs),
            move |hashes| Ok(metrics.apply(hashes)?),
        )));
    }

    if config.port.enabled {
        tasks.push(Arc::new(ReachabilityTask::new(
            ReachabilityProber::new(config.port.probe_settings()),
            config.port.targets.clone(),
            Duration::from_secs(config.port.interval_secs),
            ReachabilityMetrics::register(store)?,
        )));
    }

    if config.process.enabled {
        let collector = ProcessCollector::new(&config.process.processes)
            .context("Invalid [process] configuration")?;
        let metrics = ProcessMetrics::register(store)?;
        tasks.push(Arc::new(CollectorTask::new(
            collector,
            Duration::from_secs(config.process.interval_secs),
            move |snapshot| Ok(metrics.apply(snapshot)?),
        )));
    }

    if config.system.enabled {
        let metrics = SystemMetrics::register(store)?;
        tasks.push(Arc::new(CollectorTask::new(
            SystemCollector::new(),
            Duration::from_secs(config.system.interval_secs),
            move |snapshot| Ok(metrics.apply(snapshot)?),
        )));
    }

    if config.puppet.enabled {
        let metrics = PuppetMetrics::register(store)?;
        tasks.push(Arc::new(CollectorTask::new(
            PuppetCollector::new(config.puppet.last_run_report_path.clone()),
            Duration::from_secs(config.puppet.interval_secs),
            move |report| Ok(metrics.apply(report)?),
        )));
    }

    let clouds = [
        (ProviderKind::HetznerRobot, &config.hetzner),
        (ProviderKind::HetznerCloud, &config.hetzner_cloud),
        (ProviderKind::YandexCloud, &config.yandex_cloud),
        (ProviderKind::Aws, &config.aws),
    ];
    for (kind, cloud) in clouds {
        if !cloud.enabled {
            continue;
        }
        let providers =
            build_providers(kind, env).with_context(|| format!("Invalid [{kind}] credentials"))?;
        let policy = cloud.inventory_policy.unwrap_or_else(|| kind.default_policy());
        tracing::info!(provider = %kind, accounts = providers.len(), policy = ?policy, "Configured inventory");

        let metrics = InventoryMetrics::register(
            store,
            kind.metric_name(),
            kind.help(),
            kind.label_keys(),
            policy,
        )?;
        tasks.push(Arc::new(InventoryTask::new(
            kind,
            cloud,
            InventoryCollector::new(providers),
            metrics,
        )));
    }

    Ok(tasks)
}

fn build_providers(kind: ProviderKind, env: &dyn Env) -> Result<Vec<Arc<dyn InventoryProvider>>> {
    let mut providers: Vec<Arc<dyn InventoryProvider>> = Vec::new();
    match kind {
        ProviderKind::HetznerRobot => {
            let (user, password) = credentials::hetzner_robot(env)?;
            providers.push(Arc::new(HetznerRobotProvider::new(&user, &password)?));
        }
        ProviderKind::HetznerCloud => {
            for (index, token) in credentials::hetzner_cloud_tokens(env)?.iter().enumerate() {
                providers.push(Arc::new(HetznerCloudProvider::new(index, token)?));
            }
        }
        ProviderKind::YandexCloud => {
            let accounts = credentials::yandex_accounts(env)?;
            credentials::ensure_unique(
                accounts.iter().map(|a| a.key.account_id.as_str()),
                "service account",
            )?;
            for account in accounts {
                providers.push(Arc::new(YandexCloudProvider::new(
                    account.key,
                    &account.folder_id,
                )?));
            }
        }
        ProviderKind::Aws => {
            let accounts = credentials::aws_accounts(env)?;
            credentials::ensure_unique(
                accounts.iter().map(|a| a.access_key_id.as_str()),
                "access key",
            )?;
            for account in accounts {
                providers.push(Arc::new(AwsProvider::new(account)?));
            }
        }
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names(tasks: &[Arc<dyn PollTask>]) -> Vec<String> {
        tasks.iter().map(|t| t.name().to_string()).collect()
    }

    #[test]
    fn disabled_config_should_build_no_tasks() {
        let config = AgentConfig::parse("").unwrap();
        let tasks = build_tasks(&config, &MetricStore::new(), &env(&[])).unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn enabled_sections_should_build_tasks() {
        let config = AgentConfig::parse(
            r#"
[port]
enabled = true
[system]
enabled = true
interval_secs = 30
[hetzner_cloud]
enabled = true
[aws]
enabled = true
"#,
        )
        .unwrap();
        let env = env(&[
            ("HCLOUD_TOKEN_0", "t0"),
            ("HCLOUD_TOKEN_1", "t1"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_DEFAULT_REGION", "eu-central-1"),
        ]);

        let tasks = build_tasks(&config, &MetricStore::new(), &env).unwrap();
        assert_eq!(
            names(&tasks),
            vec!["port", "system", "hetzner_cloud_server", "aws_cloud_server"]
        );
        assert_eq!(tasks[1].interval(), Duration::from_secs(30));
        assert_eq!(tasks[2].interval(), Duration::from_secs(600));
        assert!(tasks[2].startup_delay().is_none());
    }

    #[test]
    fn missing_credentials_should_be_fatal() {
        let config = AgentConfig::parse("[hetzner]\nenabled = true\n").unwrap();
        let err = build_tasks(&config, &MetricStore::new(), &env(&[]))
            .err()
            .expect("missing credentials must fail");
        assert!(format!("{err:#}").contains("HROBOT_USER"));
    }

    #[test]
    fn invalid_process_regex_should_be_fatal() {
        let config = AgentConfig::parse(
            "[process]\nenabled = true\n[[process.processes]]\nprocess = \"bad\"\nregex = \"(\"\n",
        )
        .unwrap();
        assert!(build_tasks(&config, &MetricStore::new(), &env(&[])).is_err());
    }

    #[test]
    fn duplicate_aws_accounts_should_be_fatal() {
        let config = AgentConfig::parse("[aws]\nenabled = true\n").unwrap();
        let env = env(&[
            ("AWS_ACCESS_KEY_ID_0", "AKID"),
            ("AWS_SECRET_ACCESS_KEY_0", "s"),
            ("AWS_DEFAULT_REGION_0", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID_1", "AKID"),
            ("AWS_SECRET_ACCESS_KEY_1", "s"),
            ("AWS_DEFAULT_REGION_1", "eu-west-1"),
        ]);
        assert!(build_tasks(&config, &MetricStore::new(), &env).is_err());
    }

    #[test]
    fn random_sleep_should_set_startup_delay() {
        let config = AgentConfig::parse(
            "[hetzner_cloud]\nenabled = true\nrandom_sleep_before_start = true\n",
        )
        .unwrap();
        let tasks =
            build_tasks(&config, &MetricStore::new(), &env(&[("HCLOUD_TOKEN", "t")])).unwrap();
        let delay = tasks[0].startup_delay().unwrap();
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn reachability_task_should_write_results() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = MetricStore::new();
        let task = ReachabilityTask::new(
            ReachabilityProber::default(),
            vec![Target::new("127.0.0.1", port, oxport_common::types::Protocol::Tcp)],
            Duration::from_secs(60),
            ReachabilityMetrics::register(&store).unwrap(),
        );

        task.run_cycle().await.unwrap();
        let text = store.render().unwrap();
        assert!(text.contains(&format!(
            "network_target{{host=\"127.0.0.1\",port=\"{port}\",protocol=\"TCP\"}} 1"
        )));
    }
}
