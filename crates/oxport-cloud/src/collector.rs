use crate::InventoryProvider;
use oxport_common::types::{InventoryEntity, InventorySnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_ACCOUNT_TIMEOUT_SECS: u64 = 120;

/// Polls every account of one provider concurrently and merges the results.
///
/// A failing account is logged and contributes nothing; the snapshot is then
/// marked incomplete so callers can avoid pruning on partial data.
pub struct InventoryCollector {
    providers: Vec<Arc<dyn InventoryProvider>>,
    concurrency: usize,
    account_timeout: Duration,
}

impl InventoryCollector {
    pub fn new(providers: Vec<Arc<dyn InventoryProvider>>) -> Self {
        Self {
            providers,
            concurrency: DEFAULT_CONCURRENCY,
            account_timeout: Duration::from_secs(DEFAULT_ACCOUNT_TIMEOUT_SECS),
        }
    }

    pub fn with_account_timeout(mut self, account_timeout: Duration) -> Self {
        self.account_timeout = account_timeout;
        self
    }

    pub fn account_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn collect(&self) -> InventorySnapshot {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut tasks = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let sem = Arc::clone(&semaphore);
            let account_timeout = self.account_timeout;

            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.ok()?;
                match timeout(account_timeout, poll_account(provider.as_ref())).await {
                    Ok(Ok(entities)) => {
                        tracing::info!(
                            account = %provider.name(),
                            count = entities.len(),
                            "Fetched inventory"
                        );
                        Some(entities)
                    }
                    Ok(Err(e)) => {
                        tracing::error!(account = %provider.name(), error = %e, "Failed to fetch inventory");
                        None
                    }
                    Err(_) => {
                        tracing::error!(
                            account = %provider.name(),
                            timeout = ?account_timeout,
                            "Timed out fetching inventory"
                        );
                        None
                    }
                }
            }));
        }

        let mut snapshot = InventorySnapshot {
            entities: Vec::new(),
            complete: true,
        };
        for task in tasks {
            match task.await {
                Ok(Some(entities)) => snapshot.entities.extend(entities),
                Ok(None) => snapshot.complete = false,
                Err(e) => {
                    tracing::error!(error = %e, "Inventory task panicked");
                    snapshot.complete = false;
                }
            }
        }
        snapshot
    }
}

async fn poll_account(
    provider: &dyn InventoryProvider,
) -> crate::error::Result<Vec<InventoryEntity>> {
    provider.refresh_credential().await?;
    provider.fetch_inventory().await
}
