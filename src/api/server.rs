//! API Server

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{
    config::ApiConfig,
    errors::{BingoResult, ConfigurationError},
    lifecycle::GameController,
};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, controller: Arc<GameController>) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(controller)),
        }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> BingoResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            %addr,
            origins = ?self.config.allowed_origins,
            timeout_secs = self.config.request_timeout_secs,
            "API server listening"
        );

        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        info!("API server stopped");
        Ok(())
    }

    /// Router with the middleware stack applied
    pub fn create_app(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS before timeout so preflight is answered directly
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> BingoResult<SocketAddr> {
        let ip = self.config.host.parse::<std::net::IpAddr>().map_err(|e| ConfigurationError::InvalidValue {
            field: "api.host".to_string(),
            value: self.config.host.clone(),
            reason: e.to_string(),
        })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }
}
