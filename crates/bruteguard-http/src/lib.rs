mod api;

pub use api::{ApiError, ApiResponse, HealthStatus, ResetResult, ServiceInfo, SubnetRequest};

use axum::{
    Extension, Router,
    routing::{get, post},
};
use bruteguard_core::{GuardError, HttpConfig, ListKind, Result, TlsConfig};
use bruteguard_engine::AdmissionController;
use rustls::ServerConfig as RustlsServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// How long open TLS connections get to finish after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub struct HttpServer {
    controller: Arc<AdmissionController>,
    config: HttpConfig,
}

impl HttpServer {
    pub fn new(controller: Arc<AdmissionController>, config: HttpConfig) -> Self {
        Self { controller, config }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    ///
    /// Returns early with an error if the listener cannot be bound or the
    /// server fails.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(AppState {
            controller: self.controller.clone(),
        });

        if let Some(tls_config) = &self.config.tls {
            if tls_config.enabled {
                return self.run_https(app, tls_config, shutdown).await;
            }
        }

        self.run_http(app, shutdown).await
    }

    async fn run_http<F>(&self, app: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    async fn run_https<F>(&self, app: Router, tls_config: &TlsConfig, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let rustls_config = load_tls_config(tls_config)?;

        let https_port = self.config.https_port.unwrap_or(8443);
        let addr = SocketAddr::new(self.config.bind_address, https_port);
        info!("HTTPS server listening on https://{}", addr);
        info!("  Certificate: {}", tls_config.cert_path.display());
        info!("  Private key: {}", tls_config.key_path.display());

        let tls_rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(rustls_config));

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, tls_rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        info!("HTTPS server stopped");
        Ok(())
    }
}

fn load_tls_config(tls_config: &TlsConfig) -> Result<RustlsServerConfig> {
    let cert_file = File::open(&tls_config.cert_path)
        .map_err(|e| GuardError::InvalidConfig(format!("Failed to open certificate file: {}", e)))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<_> = certs(&mut cert_reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| GuardError::InvalidConfig(format!("Failed to parse certificate: {}", e)))?;

    if cert_chain.is_empty() {
        return Err(GuardError::InvalidConfig("No certificates found in certificate file".to_string()));
    }

    let key_file = File::open(&tls_config.key_path)
        .map_err(|e| GuardError::InvalidConfig(format!("Failed to open private key file: {}", e)))?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys = pkcs8_private_keys(&mut key_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GuardError::InvalidConfig(format!("Failed to parse private key: {}", e)))?;

    if keys.is_empty() {
        return Err(GuardError::InvalidConfig("No private keys found in key file".to_string()));
    }

    let private_key = keys.remove(0);

    RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key.into())
        .map_err(|e| GuardError::InvalidConfig(format!("Failed to build TLS config: {}", e)))
}

/// Build the API router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::service_info))
        .route("/health", get(api::health))
        // Admission
        .route("/api/auth", post(api::check_auth))
        .route("/api/buckets/reset", post(api::reset_buckets))
        // Lists
        .route(
            "/api/blacklist",
            get(api::list_subnets)
                .post(api::add_subnet)
                .delete(api::remove_subnet)
                .layer(Extension(ListKind::Blacklist)),
        )
        .route(
            "/api/whitelist",
            get(api::list_subnets)
                .post(api::add_subnet)
                .delete(api::remove_subnet)
                .layer(Extension(ListKind::Whitelist)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AdmissionController>,
}
