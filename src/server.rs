use crate::algorithms::RateLimiter;
use crate::clock;
use crate::config::Config;
use crate::counter_store::{CounterStore, MemoryCounterStore};
use crate::error::Result;
use crate::handlers::{
    breaker_status, call_dependency, call_flaky, call_slow, fixed_window_resource, metrics,
    sliding_log_resource, token_bucket_resource, AppState, SharedState,
};
use crate::health::{health_check, readiness_check};
use crate::middleware::{admission_middleware, logging_middleware, AdmissionGate};
use crate::policy_config::{EvictionSettings, PolicyConfig};
use crate::redis::RedisCounterStore;
use axum::routing::get;
use axum::{middleware, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    state: SharedState,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &Config, policy: PolicyConfig) -> Result<Self> {
        let clock = clock::system();

        let store: Arc<dyn CounterStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisCounterStore::new(url, config.redis_key_prefix.clone())?),
            None => Arc::new(MemoryCounterStore::new(clock.clone())),
        };

        let state = Arc::new(AppState::new(policy, store, clock, config.identity_strategy));

        Ok(Self {
            app: create_app(state.clone()),
            state,
            bind_addr: config.bind_addr,
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub async fn run(self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = listener.local_addr()?;

        tracing::info!("Floodgate server listening on {}", addr);
        tracing::info!(
            "Counter store backend: {}, identity strategy: {}",
            self.state.store.backend(),
            self.state.strategy
        );
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        let sweeper = spawn_eviction_sweeper(self.state.limiters(), self.state.policy.eviction.clone());

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        sweeper.abort();
        served?;
        Ok(())
    }
}

/// Build the router: limiter-gated resources, resilience demos, and
/// observability endpoints.
pub fn create_app(state: SharedState) -> Router {
    let limited = Router::new()
        .merge(
            Router::new()
                .route("/api/token-bucket", get(token_bucket_resource))
                .route_layer(middleware::from_fn_with_state(
                    gate(&state, state.token_bucket.clone()),
                    admission_middleware,
                )),
        )
        .merge(
            Router::new()
                .route("/api/fixed-window", get(fixed_window_resource))
                .route_layer(middleware::from_fn_with_state(
                    gate(&state, state.fixed_window.clone()),
                    admission_middleware,
                )),
        )
        .merge(
            Router::new()
                .route("/api/sliding-log", get(sliding_log_resource))
                .route_layer(middleware::from_fn_with_state(
                    gate(&state, state.sliding_log.clone()),
                    admission_middleware,
                )),
        );

    Router::new()
        // Resilience demos
        .route("/api/dependency", get(call_dependency))
        .route("/api/slow", get(call_slow))
        .route("/api/flaky", get(call_flaky))
        .route("/api/breaker", get(breaker_status))
        // Observability
        .route("/metrics", get(metrics))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .merge(limited)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

fn gate(state: &AppState, limiter: Arc<dyn RateLimiter>) -> AdmissionGate {
    AdmissionGate {
        limiter,
        metrics: state.metrics.clone(),
        strategy: state.strategy,
    }
}

/// Periodically drop per-identity state that has been idle for
/// `settings.idle_after`.
pub fn spawn_eviction_sweeper(
    limiters: Vec<Arc<dyn RateLimiter>>,
    settings: EvictionSettings,
) -> JoinHandle<()> {
    let period = settings.sweep_interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for limiter in &limiters {
                let removed = limiter.evict_idle(settings.idle_after);
                if removed > 0 {
                    tracing::debug!(
                        algorithm = %limiter.algorithm(),
                        removed,
                        remaining = limiter.tracked_identities(),
                        "evicted idle identities"
                    );
                }
            }
        }
    })
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
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
