use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use petid_cache::{KeyValueStore, RateLimiters, RevocationRegistry, SystemClock};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, AuthSettings};
use crate::handlers;
use crate::middleware::{rate_limit_middleware, revocation_middleware};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<KeyValueStore>,
    pub limiters: Arc<RateLimiters>,
    pub registry: Arc<RevocationRegistry>,
    pub auth: AuthSettings,
}

impl AppState {
    /// Build limiters and the revocation registry on top of `store`.
    pub fn from_config(store: Arc<KeyValueStore>, config: &AppConfig) -> Self {
        let limiters = RateLimiters::new(Arc::clone(&store), |kind| {
            config.rate_limit.policy(kind)
        });
        let registry =
            RevocationRegistry::with_sweep_interval(Arc::clone(&store), config.cache.sweep_interval());
        Self {
            store,
            limiters: Arc::new(limiters),
            registry: Arc::new(registry),
            auth: config.auth.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Assemble the router.
///
/// `api` carries the application's `/api` routes. Every `/api` request is
/// rate limited first, then checked for a revoked token.
pub fn build_app(state: AppState, api: Router<AppState>) -> Router {
    let api = api
        .route("/api/auth/logout", post(handlers::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            revocation_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct PetIdServer {
    addr: SocketAddr,
    state: AppState,
}

impl PetIdServer {
    /// Create the cache layer, connect it, and start its sweepers.
    pub async fn from_config(config: &AppConfig) -> Self {
        let store = crate::create_cache_store(&config.cache, SystemClock::shared());
        store.init().await;

        let state = AppState::from_config(store, config);
        state.registry.start();

        Self {
            addr: config.addr(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until Ctrl-C or SIGTERM, then shut the cache layer down.
    pub async fn run(self, api: Router<AppState>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        tracing::info!(addr = %self.addr, "PetID server listening");

        let app = build_app(self.state.clone(), api);
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        self.shutdown().await;
        result.map_err(ServerError::Serve)
    }

    /// Stop sweepers before closing the backend connection. Idempotent.
    pub async fn shutdown(&self) {
        self.state.registry.stop();
        self.state.store.close().await;
        tracing::info!("Cache layer shut down");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
