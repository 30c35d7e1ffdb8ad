//! Backend health endpoint served on `health.<domain>/check`.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::proxy::{Backend, ProxyState};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_OK: &str = "ok";
const STATUS_DEGRADED: &str = "degraded";

/// Aggregate health of all checked backends.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub checked_at: DateTime<Utc>,
    pub backends: BTreeMap<String, BackendHealth>,
}

/// Result of probing one backend.
#[derive(Debug, Serialize)]
pub struct BackendHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn healthy(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Probes every backend with a configured health check path.
///
/// Returns 200 when all probes succeed, 503 otherwise.
pub async fn check(State(proxy): State<ProxyState>) -> Response {
    let report = collect(&proxy).await;
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn collect(proxy: &ProxyState) -> HealthReport {
    let mut probes = JoinSet::new();
    for backend in proxy.backends() {
        let Some(path) = backend.health_check.clone() else {
            continue;
        };
        let backend = Arc::clone(backend);
        let client = proxy.client().clone();
        probes.spawn(async move {
            let health = probe(&client, &backend, &path).await;
            (backend.name.clone(), health)
        });
    }

    let mut backends = BTreeMap::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((name, health)) => {
                backends.insert(name, health);
            }
            Err(e) => tracing::error!(error = %e, "health probe task failed"),
        }
    }

    let status = if backends.values().all(|b| b.healthy) {
        STATUS_OK
    } else {
        STATUS_DEGRADED
    };
    HealthReport {
        status,
        checked_at: Utc::now(),
        backends,
    }
}

async fn probe(client: &reqwest::Client, backend: &Backend, path: &str) -> BackendHealth {
    let url = format!("{}{path}", backend.url);
    match client.get(&url).timeout(CHECK_TIMEOUT).send().await {
        Ok(response) => {
            let status = response.status();
            if !status.is_success() {
                tracing::warn!(backend = %backend.name, status = %status, "backend unhealthy");
            }
            BackendHealth {
                healthy: status.is_success(),
                status: Some(status.as_u16()),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(backend = %backend.name, error = %e, "health probe failed");
            BackendHealth {
                healthy: false,
                status: None,
                error: Some(e.to_string()),
            }
        }
    }
}
