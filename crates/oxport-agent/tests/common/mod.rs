#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use oxport_agent::app;
use oxport_agent::config::AgentConfig;
use oxport_agent::scheduler::{self, PollTask};
use oxport_agent::tasks;
use oxport_registry::MetricStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::util::ServiceExt;

pub struct TestContext {
    pub store: Arc<MetricStore>,
    pub app: axum::Router,
    pub tasks: Vec<Arc<dyn PollTask>>,
}

/// Build the store, router and tasks for `config_toml` with no cloud
/// credentials in the environment.
pub fn build_test_context(config_toml: &str) -> Result<TestContext> {
    let config = AgentConfig::parse(config_toml)?;
    let store = Arc::new(MetricStore::new());
    let tasks = tasks::build_tasks(&config, &store, &HashMap::<String, String>::new())?;
    let app = app::build_app(Arc::clone(&store));
    Ok(TestContext { store, app, tasks })
}

impl TestContext {
    /// Run one cycle of every task; returns how many succeeded.
    pub async fn run_all_once(&self) -> usize {
        let mut ok = 0;
        for task in &self.tasks {
            if scheduler::run_once(task).await {
                ok += 1;
            }
        }
        ok
    }
}

pub async fn get(app: &axum::Router, uri: &str) -> (StatusCode, HeaderMap, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should succeed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, headers, String::from_utf8_lossy(&body).to_string())
}

/// A listening port, kept open while the listener is alive.
pub async fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// A port that was just released, so nothing listens on it.
pub async fn closed_port() -> u16 {
    let (listener, port) = open_port().await;
    drop(listener);
    port
}
