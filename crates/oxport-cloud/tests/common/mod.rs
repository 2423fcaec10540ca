#![allow(dead_code)]

use anyhow::Result;
use axum::Router;
use oxport_cloud::token::ServiceAccountKey;

pub const ACCOUNT_ID: &str = "aje-test-account";
pub const KEY_ID: &str = "ajekey-test";
pub const PUBLIC_KEY_PEM: &[u8] = include_bytes!("../fixtures/service_account.pub.pem");

pub fn service_account_key() -> ServiceAccountKey {
    ServiceAccountKey {
        account_id: ACCOUNT_ID.to_string(),
        key_id: KEY_ID.to_string(),
        private_key_pem: include_bytes!("../fixtures/service_account.pem").to_vec(),
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_mock(app: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

pub fn bearer(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}
