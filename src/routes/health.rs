use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub broker: ComponentHealth,
    pub model: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms,
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn check_component<E>(check: impl Future<Output = Result<(), E>>) -> ComponentHealth {
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth::ok(Some(start.elapsed().as_millis() as u64)),
        Err(_) => ComponentHealth::error(),
    }
}

/// GET /health: dependency status plus model readiness.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = check_component(state.store.ping()).await;
    let cache = check_component(state.cache.ping()).await;
    let broker = check_component(state.publisher.ping()).await;
    let model = if state.classifier.is_ready() {
        ComponentHealth::ok(None)
    } else {
        ComponentHealth::error()
    };

    let all_healthy = database.is_ok() && cache.is_ok() && broker.is_ok() && model.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            cache,
            broker,
            model,
        },
    };

    (status_code, Json(response))
}
