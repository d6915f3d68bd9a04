//! Application startup and lifecycle management.

use crate::config::{SettlementConfig, StoreBackend};
use crate::handlers::{health, payments, services};
use crate::services::{MemoryStore, MongoStore, SettlementEngine, SettlementStore};
use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use axum::Router;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SettlementConfig,
    pub store: Arc<dyn SettlementStore>,
    pub engine: SettlementEngine,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SettlementConfig) -> Result<Self, AppError> {
        let store: Arc<dyn SettlementStore> = match config.store.backend {
            StoreBackend::Mongo => {
                let store =
                    MongoStore::connect(config.store.uri.expose_secret(), &config.store.database)
                        .await
                        .map_err(|e| {
                            tracing::error!("Failed to connect to MongoDB: {}", e);
                            e
                        })?;
                store.init_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize store indexes: {}", e);
                    e
                })?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory store; data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let engine = SettlementEngine::new(store.clone(), config.engine.clone());
        let state = AppState {
            config: config.clone(),
            store,
            engine,
        };

        // Bind listener (port 0 = random port for testing)
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the store, for seeding in tests.
    pub fn store(&self) -> Arc<dyn SettlementStore> {
        self.state.store.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_endpoint))
        .route(
            "/payments",
            get(payments::list_batches).post(payments::create_batch),
        )
        .route("/payments/eligible", get(payments::eligible_services))
        .route("/payments/service-status", get(payments::service_status))
        .route(
            "/payments/:id",
            get(payments::get_batch)
                .patch(payments::update_batch)
                .delete(payments::delete_batch),
        )
        .route("/payments/:id/notes", post(payments::append_note))
        .route("/payments/:id/items", post(payments::add_item))
        .route(
            "/payments/:id/items/:service_id",
            delete(payments::remove_item),
        )
        .route("/payments/:id/recalc", post(payments::recalc_batch))
        .route(
            "/services",
            get(services::list_services).post(services::create_service),
        )
        .route("/services/bulk", post(services::create_services_bulk))
        .route(
            "/services/:id",
            get(services::get_service)
                .patch(services::update_service)
                .delete(services::delete_service),
        )
        .with_state(state)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    actor_id = tracing::field::Empty,
                    role = tracing::field::Empty,
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Origin policy is enforced at the gateway.
        .layer(CorsLayer::permissive())
}
