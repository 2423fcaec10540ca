//! Hetzner Cloud servers, authenticated with a static API token.

use crate::error::{CloudProviderError, Result};
use crate::{decode_items, http_client, name_or_id, parse_address, read_body, InventoryProvider};
use oxport_common::types::InventoryEntity;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const HCLOUD_ENDPOINT: &str = "https://api.hetzner.cloud";

const PAGE_SIZE: u32 = 50;

pub struct HetznerCloudProvider {
    name: String,
    token: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<serde_json::Value>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Server {
    id: i64,
    #[serde(default)]
    name: String,
    server_type: ServerType,
    datacenter: Datacenter,
    #[serde(default)]
    public_net: PublicNet,
    #[serde(default)]
    private_net: Vec<PrivateNet>,
}

#[derive(Debug, Deserialize)]
struct ServerType {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Datacenter {
    name: String,
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PublicNet {
    ipv4: Option<Ipv4>,
}

#[derive(Debug, Deserialize)]
struct Ipv4 {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct PrivateNet {
    ip: String,
}

impl HetznerCloudProvider {
    /// `index` distinguishes accounts in logs; the token itself is never
    /// logged.
    pub fn new(index: usize, token: &str) -> Result<Self> {
        Self::with_base_url(index, token, HCLOUD_ENDPOINT)
    }

    pub fn with_base_url(index: usize, token: &str, base_url: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(CloudProviderError::ConfigError(
                "Hetzner Cloud token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name: format!("hetzner_cloud:{index}"),
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    async fn fetch_page(&self, page: u32) -> Result<ServerPage> {
        let response = self
            .client
            .get(format!("{}/v1/servers", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("page", page), ("per_page", PAGE_SIZE)])
            .send()
            .await?;
        let body = read_body(&self.name, response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl InventoryProvider for HetznerCloudProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh_credential(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<Vec<InventoryEntity>> {
        let mut entities = Vec::new();
        let mut page = 1;
        loop {
            let result = self.fetch_page(page).await?;
            let servers: Vec<Server> = decode_items(&self.name, result.servers);
            entities.extend(servers.into_iter().map(to_entity));

            match result.meta.and_then(|m| m.pagination).and_then(|p| p.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Ok(entities)
    }
}

fn to_entity(server: Server) -> InventoryEntity {
    let id = server.id.to_string();
    InventoryEntity {
        display_name: name_or_id(&server.name, &id),
        id,
        machine_type: server.server_type.name,
        zone: server.datacenter.name,
        region: server.datacenter.location.name,
        public_address: server.public_net.ipv4.and_then(|v4| parse_address(&v4.ip)),
        private_address: server.private_net.first().and_then(|n| parse_address(&n.ip)),
        attributes: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "servers": [
            {
                "id": 42,
                "name": "web-1",
                "status": "running",
                "server_type": {"name": "cx22", "cores": 2},
                "datacenter": {"name": "fsn1-dc14", "location": {"name": "fsn1"}},
                "public_net": {"ipv4": {"ip": "192.0.2.10"}, "ipv6": null},
                "private_net": [{"ip": "10.0.0.2", "network": 7}]
            },
            {
                "id": 43,
                "name": "",
                "server_type": {"name": "cx32"},
                "datacenter": {"name": "hel1-dc2", "location": {"name": "hel1"}},
                "public_net": {"ipv4": null}
            },
            {"id": "broken"}
        ],
        "meta": {"pagination": {"page": 1, "next_page": null}}
    }"#;

    #[test]
    fn page_should_decode_and_skip_malformed_servers() {
        let page: ServerPage = serde_json::from_str(PAGE).unwrap();
        let servers: Vec<Server> = decode_items("hetzner_cloud:0", page.servers);
        assert_eq!(servers.len(), 2);

        let entities: Vec<_> = servers.into_iter().map(to_entity).collect();
        assert_eq!(entities[0].zone, "fsn1-dc14");
        assert_eq!(entities[0].region, "fsn1");
        assert_eq!(entities[0].machine_type, "cx22");
        assert_eq!(entities[0].label_value("ip"), "192.0.2.10");
        assert_eq!(entities[0].label_value("private_ip"), "10.0.0.2");

        assert_eq!(entities[1].display_name, "43");
        assert_eq!(entities[1].public_address, None);
    }

    #[test]
    fn new_should_reject_empty_token() {
        assert!(HetznerCloudProvider::new(0, "").is_err());
    }
}
