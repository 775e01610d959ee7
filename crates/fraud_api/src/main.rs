//! Signup fraud-risk scoring API server.
//!
//! Boots the risk engine over the configured store, exposes the analyse /
//! results / admin endpoints, and (when enabled) runs the background
//! enrichment worker in-process against the shared store.

use axum::Router;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use fraud_core::{disposable, DisposableRegistry, KvStore, MemoryStore, RiskEngine};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api_handler;
mod auth;
mod config;
mod middleware;
mod routes;
mod webhook;

use config::AppConfig;
use webhook::WebhookNotifier;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RiskEngine>,
    pub store: Arc<dyn KvStore>,
    pub registry: Arc<DisposableRegistry>,
    pub config: Arc<AppConfig>,
    pub notifier: Arc<WebhookNotifier>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(&config);

    info!(
        "Starting fraud-risk API v{} ({})",
        env!("CARGO_PKG_VERSION"),
        config.security.environment
    );

    // Fail closed before any socket is opened.
    config
        .validate()
        .map_err(|e| format!("configuration rejected: {e}"))?;

    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

    let seed = match &config.disposable.seed_path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read disposable seed {path}: {e}"))?,
        None => disposable::SEED_LIST.to_string(),
    };
    let registry = Arc::new(
        DisposableRegistry::load(
            &seed,
            config.disposable.remote_url.as_deref(),
            config.disposable.bloom_fp_rate,
        )
        .await
        .map_err(|e| format!("disposable registry failed to load: {e}"))?,
    );
    info!(
        domains = registry.domain_count(),
        "disposable registry ready"
    );

    let engine_config = config
        .engine_config()
        .map_err(|e| format!("configuration rejected: {e}"))?;
    let engine = Arc::new(RiskEngine::new(
        engine_config,
        store.clone(),
        registry.clone(),
    )?);

    let notifier = Arc::new(WebhookNotifier::new(
        config.webhook_urls(),
        config.webhooks.verify_tls,
        Duration::from_secs(config.webhooks.timeout_secs),
    )?);

    let state = AppState {
        engine: engine.clone(),
        store: store.clone(),
        registry,
        config: Arc::new(config.clone()),
        notifier: notifier.clone(),
    };

    // The in-memory store is process-local, so the enrichment worker shares
    // this process rather than running as a separate deployment.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = if config.enrichment.enable_background_enrichment {
        let ttl = Duration::from_secs(config.enrichment.result_ttl_secs);
        let worker_notifier = notifier.clone();
        Some(tokio::spawn(fraud_core::enrichment::run_worker(
            engine,
            store,
            ttl,
            shutdown_rx,
            move |input, envelope| {
                worker_notifier.spawn_notify(
                    envelope,
                    input.ip.as_deref(),
                    input.user_agent.as_deref(),
                );
            },
        )))
    } else {
        None
    };

    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");
    info!("Analyse endpoint: http://{addr}/api/v1/analyse");
    info!("Fast analyse endpoint: http://{addr}/api/v1/analyse/fast");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            warn!(error = %e, "enrichment worker did not stop cleanly");
        }
    }

    info!("Server shut down gracefully");
    Ok(())
}

fn build_app(state: AppState) -> Router {
    routes::build_routes(Arc::new(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(CompressionLayer::new())
}

/// Defaults, then `Config.toml` when present, then `FRAUD_API_*` environment
/// variables.
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if std::path::Path::new("Config.toml").exists() {
        figment = figment.merge(Toml::file("Config.toml"));
    }
    figment = figment.merge(Env::prefixed("FRAUD_API_").split("__"));
    Ok(figment.extract()?)
}

fn init_tracing(config: &AppConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    async fn test_state(config: AppConfig) -> AppState {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        // Cached MX answers keep handler tests off the network.
        store.set("mx:gmail.com", "1", None).await.unwrap();
        store.set("mx:mailinator.com", "1", None).await.unwrap();
        store.set("mx:example.com", "1", None).await.unwrap();

        let registry = Arc::new(
            DisposableRegistry::from_list(disposable::SEED_LIST, 0.0001).unwrap(),
        );
        let engine = Arc::new(
            RiskEngine::new(config.engine_config().unwrap(), store.clone(), registry.clone())
                .unwrap()
                .with_slow_probes(Vec::new()),
        );
        let notifier = Arc::new(
            WebhookNotifier::new(Vec::new(), true, Duration::from_secs(1)).unwrap(),
        );
        AppState {
            engine,
            store,
            registry,
            config: Arc::new(config),
            notifier,
        }
    }

    fn analyse_request(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn analyse_returns_envelope_shape() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(analyse_request(
                "/api/v1/analyse",
                r#"{"email": "john.doe@gmail.com", "ip_address": "203.0.114.5"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["normalized_email"], "john.doe@gmail.com");
        assert_eq!(json["risk_summary"]["score"], 0);
        assert_eq!(json["risk_summary"]["level"], "LOW");
        assert_eq!(json["risk_summary"]["action"], "ALLOW");
        assert_eq!(json["enrichment"]["status"], "COMPLETE");
        assert!(json["reasons"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disposable_signup_is_blocked() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(analyse_request(
                "/api/v1/analyse",
                r#"{"email": "anything@mailinator.com"}"#,
            ))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["risk_summary"]["score"], 90);
        assert_eq!(json["risk_summary"]["level"], "HIGH");
        assert_eq!(json["risk_summary"]["action"], "BLOCK");
        assert_eq!(json["reasons"][0]["code"], "DISPOSABLE_DOMAIN");
    }

    #[tokio::test]
    async fn invalid_email_is_a_400() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(analyse_request(
                "/api/v1/analyse",
                r#"{"email": "not-an-email"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error_code"], "INVALID_SYNTAX");
    }

    #[tokio::test]
    async fn fast_mode_reports_disabled_without_enrichment() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(analyse_request(
                "/api/v1/analyse/fast",
                r#"{"email": "user+tag@gmail.com"}"#,
            ))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["normalized_email"], "user@gmail.com");
        assert_eq!(json["signals"]["is_alias"], true);
        assert_eq!(json["enrichment"]["status"], "DISABLED");
        assert_eq!(json["enrichment"]["job_id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn fast_mode_enqueues_job_when_enrichment_enabled() {
        let mut config = AppConfig::default();
        config.enrichment.enable_background_enrichment = true;
        let state = test_state(config).await;
        let store = state.store.clone();
        let app = build_app(state);

        let response = app
            .oneshot(analyse_request(
                "/api/v1/analyse/fast",
                r#"{"email": "user@example.com"}"#,
            ))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["enrichment"]["status"], "PENDING");
        let job_id = json["enrichment"]["job_id"].as_str().unwrap().to_string();

        // The partial envelope is pollable immediately.
        let stored = fraud_core::enrichment::get_result(store.as_ref(), &job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.enrichment.status,
            fraud_core::EnrichmentStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_result_is_a_404() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/results/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn request_id_is_echoed() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "trace-me-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-request-id").unwrap(),
            "trace-me-42"
        );
    }

    #[tokio::test]
    async fn admin_routes_require_key_outside_dev() {
        let mut config = AppConfig::default();
        config.security.environment = "prod".to_string();
        config.security.admin_api_key = "s3cret".to_string();
        let app = build_app(test_state(config).await);

        let denied = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats/overview")
                    .header("x-admin-api-key", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_unset_key_fails_closed_in_prod() {
        let mut config = AppConfig::default();
        config.security.environment = "prod".to_string();
        // validate() would reject this at startup; the guard is the second
        // line of defense.
        let app = build_app(test_state(config).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn clear_velocity_drops_counters() {
        let state = test_state(AppConfig::default()).await;
        let store = state.store.clone();
        store
            .set("vel:ip:198.51.101.9:473000", "7", None)
            .await
            .unwrap();
        let app = build_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/clear-velocity/198.51.101.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert!(store.scan_keys("vel:ip:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_connected_store() {
        let app = build_app(test_state(AppConfig::default()).await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store"], "connected");
    }
}
