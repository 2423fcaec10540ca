//! Yandex Cloud compute instances.
//!
//! Authentication goes through a per-account [`TokenManager`]; the IAM token
//! is refreshed lazily at the start of a poll when it has expired.

use crate::error::{CloudProviderError, Result};
use crate::token::{IamTokenExchange, ServiceAccountKey, TokenExchange, TokenManager, TokenState};
use crate::{decode_items, http_client, name_or_id, parse_address, read_body, region_from_zone, InventoryProvider};
use chrono::Utc;
use jsonwebtoken::EncodingKey;
use oxport_common::types::InventoryEntity;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

pub const COMPUTE_ENDPOINT: &str = "https://compute.api.cloud.yandex.net";

const PAGE_SIZE: u32 = 1000;

pub struct YandexCloudProvider {
    name: String,
    folder_id: String,
    base_url: String,
    client: Client,
    tokens: Mutex<TokenManager>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstancePage {
    #[serde(default)]
    instances: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    id: String,
    #[serde(default)]
    name: String,
    zone_id: String,
    #[serde(default)]
    platform_id: String,
    #[serde(default)]
    resources: Resources,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

/// int64 fields arrive as JSON strings.
#[derive(Debug, Default, Deserialize)]
struct Resources {
    #[serde(default, deserialize_with = "int64")]
    memory: i64,
    #[serde(default, deserialize_with = "int64")]
    cores: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    primary_v4_address: Option<PrimaryAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrimaryAddress {
    #[serde(default)]
    address: String,
    one_to_one_nat: Option<OneToOneNat>,
}

#[derive(Debug, Deserialize)]
struct OneToOneNat {
    #[serde(default)]
    address: String,
}

fn int64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64Input {
        Text(String),
        Number(i64),
    }

    match Int64Input::deserialize(deserializer)? {
        Int64Input::Number(n) => Ok(n),
        Int64Input::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl YandexCloudProvider {
    /// Fails on an empty folder id or a private key that is not valid RSA PEM.
    pub fn new(key: ServiceAccountKey, folder_id: &str) -> Result<Self> {
        let exchange = IamTokenExchange::new(http_client()?);
        Self::with_exchange(key, folder_id, COMPUTE_ENDPOINT, Box::new(exchange))
    }

    pub fn with_exchange(
        key: ServiceAccountKey,
        folder_id: &str,
        base_url: &str,
        exchange: Box<dyn TokenExchange>,
    ) -> Result<Self> {
        if folder_id.is_empty() {
            return Err(CloudProviderError::ConfigError(format!(
                "folder id for service account {} must not be empty",
                key.account_id
            )));
        }
        EncodingKey::from_rsa_pem(&key.private_key_pem)?;

        Ok(Self {
            name: format!("yandex_cloud:{}", key.account_id),
            folder_id: folder_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
            tokens: Mutex::new(TokenManager::new(key, exchange)),
        })
    }

    async fn fetch_page(&self, token: &str, page_token: &str) -> Result<InstancePage> {
        let mut request = self
            .client
            .get(format!("{}/compute/v1/instances", self.base_url))
            .bearer_auth(token)
            .query(&[("folderId", self.folder_id.as_str())])
            .query(&[("pageSize", PAGE_SIZE)]);
        if !page_token.is_empty() {
            request = request.query(&[("pageToken", page_token)]);
        }

        let body = read_body(&self.name, request.send().await?).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl InventoryProvider for YandexCloudProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh_credential(&self) -> Result<()> {
        let mut tokens = self.tokens.lock().await;
        let now = Utc::now();
        if tokens.state_at(now) != TokenState::Valid {
            tokens.refresh_at(now).await?;
        }
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<Vec<InventoryEntity>> {
        let token = self.tokens.lock().await.bearer().await?;

        let mut entities = Vec::new();
        let mut page_token = String::new();
        loop {
            let page = self.fetch_page(&token, &page_token).await?;
            let instances: Vec<Instance> = decode_items(&self.name, page.instances);
            entities.extend(instances.into_iter().map(to_entity));

            if page.next_page_token.is_empty() || page.next_page_token == page_token {
                break;
            }
            page_token = page.next_page_token;
        }
        Ok(entities)
    }
}

fn to_entity(instance: Instance) -> InventoryEntity {
    let primary = instance
        .network_interfaces
        .into_iter()
        .next()
        .and_then(|nic| nic.primary_v4_address);
    let (public_address, private_address) = match primary {
        Some(addr) => (
            addr.one_to_one_nat.and_then(|nat| parse_address(&nat.address)),
            parse_address(&addr.address),
        ),
        None => (None, None),
    };

    let mut attributes = BTreeMap::new();
    attributes.insert("cpu_count".to_string(), instance.resources.cores.to_string());
    attributes.insert("memory".to_string(), instance.resources.memory.to_string());

    InventoryEntity {
        display_name: name_or_id(&instance.name, &instance.id),
        id: instance.id,
        machine_type: instance.platform_id,
        region: region_from_zone(&instance.zone_id),
        zone: instance.zone_id,
        public_address,
        private_address,
        attributes,
    }
}
