//! Hetzner Robot (dedicated servers).

use crate::error::{CloudProviderError, Result};
use crate::{
    decode_items, http_client, name_or_id, parse_address, read_body, split_datacenter,
    InventoryProvider,
};
use oxport_common::types::InventoryEntity;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const ROBOT_ENDPOINT: &str = "https://robot-ws.your-server.de";

pub struct HetznerRobotProvider {
    name: String,
    user: String,
    password: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: RobotServer,
}

#[derive(Debug, Deserialize)]
struct RobotServer {
    server_number: i64,
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    server_ip: Option<String>,
    #[serde(default)]
    product: String,
    #[serde(default)]
    dc: String,
}

impl HetznerRobotProvider {
    pub fn new(user: &str, password: &str) -> Result<Self> {
        Self::with_base_url(user, password, ROBOT_ENDPOINT)
    }

    pub fn with_base_url(user: &str, password: &str, base_url: &str) -> Result<Self> {
        if user.is_empty() || password.is_empty() {
            return Err(CloudProviderError::ConfigError(
                "Hetzner Robot user and password must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name: format!("hetzner:{user}"),
            user: user.to_string(),
            password: password.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }
}

#[async_trait::async_trait]
impl InventoryProvider for HetznerRobotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh_credential(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<Vec<InventoryEntity>> {
        let response = self
            .client
            .get(format!("{}/server", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        // Robot answers 404 when the account has no servers.
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(account = %self.name, "No servers on Robot account");
            return Ok(Vec::new());
        }

        let body = read_body(&self.name, response).await?;
        let items: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        let servers: Vec<ServerEnvelope> = decode_items(&self.name, items);

        Ok(servers.into_iter().map(|s| to_entity(s.server)).collect())
    }
}

fn to_entity(server: RobotServer) -> InventoryEntity {
    let (zone, region) = split_datacenter(&server.dc);
    let id = server.server_number.to_string();
    InventoryEntity {
        display_name: name_or_id(&server.server_name, &id),
        id,
        machine_type: server.product,
        zone,
        region,
        public_address: server.server_ip.as_deref().and_then(parse_address),
        private_address: None,
        attributes: BTreeMap::new(),
    }
}
