//! AWS EC2 instances via the `DescribeInstances` query API.
//!
//! Requests are signed with Signature Version 4 and the response is XML.

use crate::error::{CloudProviderError, Result};
use crate::{http_client, parse_address, read_body, resolve_display_name, InventoryProvider};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use oxport_common::types::InventoryEntity;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const EC2_SERVICE: &str = "ec2";
const EC2_VERSION: &str = "2016-11-15";
const MAX_RESULTS: &str = "1000";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static access key pair scoped to one region.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// SigV4 request signer for one service in one region.
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(credentials: &AwsCredentials, service: &str) -> Self {
        Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            region: credentials.region.clone(),
            service: service.to_string(),
        }
    }

    /// Build the `Authorization` header value.
    ///
    /// `headers` must hold every signed header with lowercase names,
    /// including `host` and `x-amz-date`.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        query: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let date = now.format("%Y%m%d").to_string();
        let request = canonical_request(method, path, query, headers, payload);
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{:x}",
            amz_date(now),
            scope,
            Sha256::digest(request.as_bytes())
        );

        let key = signing_key(&self.secret_access_key, &date, &self.region, &self.service)?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        Ok(format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key_id, scope, signed_headers, signature
        ))
    }
}

/// `YYYYMMDD'T'HHMMSS'Z'` as used by `x-amz-date`.
pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn canonical_request(
    method: &str,
    path: &str,
    query: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
    payload: &[u8],
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    format!(
        "{}\n{}\n{}\n{}\n{}\n{:x}",
        method,
        path,
        canonical_query(query),
        canonical_headers,
        signed_headers,
        Sha256::digest(payload)
    )
}

/// Sorted `key=value` pairs, both sides percent-encoded (RFC 3986).
pub fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CloudProviderError::HmacError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservation_set: ItemSet<Reservation>,
    next_token: Option<String>,
}

/// EC2 wraps every list in `<item>` elements.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemSet<T> {
    #[serde(default, rename = "item")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    #[serde(default)]
    instances_set: ItemSet<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    instance_id: Option<String>,
    #[serde(default)]
    instance_type: String,
    placement: Option<Placement>,
    private_dns_name: Option<String>,
    private_ip_address: Option<String>,
    ip_address: Option<String>,
    #[serde(default)]
    tag_set: ItemSet<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Placement {
    #[serde(default)]
    availability_zone: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    key: String,
    value: Option<String>,
}

pub struct AwsProvider {
    name: String,
    credentials: AwsCredentials,
    endpoint: String,
    host: String,
    client: Client,
}

impl AwsProvider {
    pub fn new(credentials: AwsCredentials) -> Result<Self> {
        let endpoint = format!("https://ec2.{}.amazonaws.com", credentials.region);
        Self::with_endpoint(credentials, &endpoint)
    }

    pub fn with_endpoint(credentials: AwsCredentials, endpoint: &str) -> Result<Self> {
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(CloudProviderError::ConfigError(
                "AWS access key id and secret must not be empty".to_string(),
            ));
        }
        if credentials.region.is_empty() {
            return Err(CloudProviderError::ConfigError(format!(
                "AWS region for access key {} must not be empty",
                credentials.access_key_id
            )));
        }

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(endpoint.as_str())
            .to_string();

        Ok(Self {
            name: format!("aws:{}:{}", credentials.region, credentials.access_key_id),
            credentials,
            endpoint,
            host,
            client: http_client()?,
        })
    }

    async fn describe_instances(&self, next_token: Option<&str>) -> Result<DescribeInstancesResponse> {
        let mut query = BTreeMap::new();
        query.insert("Action".to_string(), "DescribeInstances".to_string());
        query.insert("Version".to_string(), EC2_VERSION.to_string());
        query.insert("MaxResults".to_string(), MAX_RESULTS.to_string());
        if let Some(token) = next_token {
            query.insert("NextToken".to_string(), token.to_string());
        }

        let now = Utc::now();
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-date".to_string(), amz_date(now));

        let signer = SigV4Signer::new(&self.credentials, EC2_SERVICE);
        let authorization = signer.authorization("GET", "/", &query, &headers, b"", now)?;

        let url = format!("{}/?{}", self.endpoint, canonical_query(&query));
        let response = self
            .client
            .get(&url)
            .header("Host", &self.host)
            .header("X-Amz-Date", amz_date(now))
            .header("Authorization", authorization)
            .send()
            .await?;

        let body = read_body(&self.name, response).await?;
        Ok(quick_xml::de::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl InventoryProvider for AwsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh_credential(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<Vec<InventoryEntity>> {
        let mut entities = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut page = self.describe_instances(next_token.as_deref()).await?;
            let following = page.next_token.take().filter(|t| !t.is_empty());
            entities.extend(page_entities(&self.name, page, &self.credentials.region));

            match following {
                Some(token) if Some(&token) != next_token.as_ref() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(entities)
    }
}

fn page_entities(
    provider: &str,
    page: DescribeInstancesResponse,
    region: &str,
) -> Vec<InventoryEntity> {
    page.reservation_set
        .items
        .into_iter()
        .flat_map(|reservation| reservation.instances_set.items)
        .filter_map(|instance| {
            let entity = to_entity(instance, region);
            if entity.is_none() {
                tracing::warn!(provider, "Skipping EC2 instance without an id");
            }
            entity
        })
        .collect()
}

fn to_entity(instance: Instance, region: &str) -> Option<InventoryEntity> {
    let id = instance.instance_id.filter(|id| !id.is_empty())?;
    let private_dns_name = instance.private_dns_name.unwrap_or_default();
    let tags = instance
        .tag_set
        .items
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_deref().unwrap_or_default()));
    let display_name = resolve_display_name(tags, &private_dns_name);

    let mut attributes = BTreeMap::new();
    attributes.insert("private_dns_name".to_string(), private_dns_name);

    Some(InventoryEntity {
        id,
        display_name,
        machine_type: instance.instance_type,
        zone: instance.placement.map(|p| p.availability_zone).unwrap_or_default(),
        region: region.to_string(),
        public_address: instance.ip_address.as_deref().and_then(parse_address),
        private_address: instance.private_ip_address.as_deref().and_then(parse_address),
        attributes,
    })
}
