//! Inventory adapters for cloud and bare-metal providers.
//!
//! Every adapter implements [`InventoryProvider`] and normalizes its API
//! objects into [`InventoryEntity`] values; provider quirks stay inside the
//! adapter, shared normalization lives here.

pub mod aws;
pub mod collector;
pub mod error;
pub mod hcloud;
pub mod hetzner;
pub mod token;
pub mod yandex;

use oxport_common::types::{InventoryEntity, InventoryPolicy};
use reqwest::{Client, Response};
use std::net::IpAddr;
use std::time::Duration;

/// Per-request timeout for provider APIs.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// One configured account at one provider.
#[async_trait::async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Account label used in logs (e.g. `"yandex:aje123"`).
    fn name(&self) -> &str;

    /// Make sure the account's credential is usable for the next fetch.
    /// Static credentials return immediately.
    async fn refresh_credential(&self) -> error::Result<()>;

    /// List the account's current compute resources.
    async fn fetch_inventory(&self) -> error::Result<Vec<InventoryEntity>>;
}

/// Provider families and the series each one exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    HetznerRobot,
    HetznerCloud,
    YandexCloud,
    Aws,
}

impl ProviderKind {
    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::HetznerRobot => "hetzner_robot_server",
            Self::HetznerCloud => "hetzner_cloud_server",
            Self::YandexCloud => "yandex_cloud_server",
            Self::Aws => "aws_cloud_server",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Self::HetznerRobot => "Hetzner Robot dedicated server",
            Self::HetznerCloud => "Hetzner Cloud server",
            Self::YandexCloud => "Yandex Cloud compute instance",
            Self::Aws => "AWS EC2 instance",
        }
    }

    /// Label keys of the inventory series, resolved per entity with
    /// [`InventoryEntity::label_value`].
    pub fn label_keys(&self) -> &'static [&'static str] {
        match self {
            Self::HetznerRobot | Self::HetznerCloud => {
                &["id", "name", "type", "zone", "region", "ip"]
            }
            Self::YandexCloud => &[
                "id",
                "name",
                "type",
                "zone",
                "region",
                "public_ip",
                "private_ip",
                "cpu_count",
                "memory",
            ],
            Self::Aws => &[
                "id",
                "name",
                "type",
                "zone",
                "region",
                "public_ip",
                "private_ip",
                "private_dns_name",
            ],
        }
    }

    pub fn default_policy(&self) -> InventoryPolicy {
        match self {
            Self::YandexCloud => InventoryPolicy::EvictChanged,
            _ => InventoryPolicy::Retain,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HetznerRobot => "hetzner",
            Self::HetznerCloud => "hetzner_cloud",
            Self::YandexCloud => "yandex_cloud",
            Self::Aws => "aws",
        };
        f.write_str(name)
    }
}

/// Shared HTTP client settings for all adapters.
pub fn http_client() -> error::Result<Client> {
    Ok(Client::builder()
        .use_rustls_tls()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?)
}

/// Read the body of `response`, turning a non-2xx status into
/// [`error::CloudProviderError::HttpError`].
pub(crate) async fn read_body(provider: &str, response: Response) -> error::Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(error::CloudProviderError::HttpError {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Decode list items one by one so a malformed entry only drops itself.
pub(crate) fn decode_items<T>(provider: &str, items: Vec<serde_json::Value>) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(provider, error = %e, "Skipping malformed inventory entry");
                None
            }
        })
        .collect()
}

/// Parse an address field. Empty or malformed input is treated as absent.
///
/// ```rust
/// use oxport_cloud::parse_address;
///
/// assert!(parse_address("10.0.0.1").is_some());
/// assert!(parse_address("").is_none());
/// assert!(parse_address("<nil>").is_none());
/// ```
pub fn parse_address(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

/// Split a Hetzner Robot datacenter like `FSN1-DC14` into
/// `(zone, region)` = `("fsn1-dc14", "fsn1")`.
pub fn split_datacenter(dc: &str) -> (String, String) {
    let zone = dc.to_lowercase();
    let region = zone.split('-').next().unwrap_or_default().to_string();
    (zone, region)
}

/// Derive the region from a zone like `ru-central1-a` by dropping the
/// segment after the last `-`. A zone without `-` is its own region.
pub fn region_from_zone(zone: &str) -> String {
    match zone.rfind('-') {
        Some(idx) => zone[..idx].to_string(),
        None => zone.to_string(),
    }
}

/// Pick a display name from provider tags.
///
/// Tags are scanned in order; the first `Name` tag wins, but scanning stops at
/// the first platform-reserved `aws:eks*` tag. Without a usable tag the
/// provider default identifier is returned.
pub fn resolve_display_name<'a, I>(tags: I, fallback: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (key, value) in tags {
        if key.contains("aws:eks") {
            break;
        }
        if key == "Name" {
            return value.to_string();
        }
    }
    fallback.to_string()
}

/// First-class name field, falling back to the id when empty.
pub fn name_or_id(name: &str, id: &str) -> String {
    if name.trim().is_empty() {
        id.to_string()
    } else {
        name.to_string()
    }
}
