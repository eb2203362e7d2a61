//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, RuntimeKind};
use crate::error::{DaemonError, DaemonResult};
use fleet_control::{FleetControlPlane, FleetControlPlaneBuilder};
use fleet_policy::StaticClassifier;
use fleet_proxy::ScriptedProber;
use fleet_runtime::{DockerRuntime, SimulatedRuntime};
use fleet_types::SafeguardPolicy;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Fleet daemon server
pub struct Server {
    config: DaemonConfig,
    plane: Arc<FleetControlPlane>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let plane = Arc::new(build_plane(&config)?);
        Ok(Self { config, plane })
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let report = self.plane.start().await?;
        tracing::info!(
            restored = report.restored,
            resumed = report.resumed,
            lost = report.lost,
            interrupted = report.interrupted,
            "Fleet state reattached"
        );

        let app = create_router(
            AppState::new(self.plane.clone()),
            self.config.server.enable_cors,
        );
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("fleetd listening on {}", addr);
        tracing::info!("Container runtime: {:?}", self.config.runtime);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("fleetd shutting down");
        self.plane
            .shutdown(self.config.server.drain_timeout())
            .await;

        Ok(())
    }
}

/// Wire the control plane for the configured runtime. Simulated mode also
/// swaps in offline proxy probing and classification.
pub fn build_plane(config: &DaemonConfig) -> DaemonResult<FleetControlPlane> {
    let policy = match &config.safeguards_file {
        Some(path) => load_safeguards(path)?,
        None => SafeguardPolicy::default(),
    };

    let builder = FleetControlPlaneBuilder::new(config.fleet.clone());
    let builder = match config.runtime {
        RuntimeKind::Docker => {
            let docker = DockerRuntime::connect()
                .map_err(|e| DaemonError::Server(e.to_string()))?;
            builder.with_runtime(Arc::new(docker))
        }
        RuntimeKind::Simulated => {
            let country = policy
                .allowed_countries
                .first()
                .cloned()
                .unwrap_or_else(|| "US".to_string());
            builder
                .with_runtime(Arc::new(SimulatedRuntime::new()))
                .with_prober(Arc::new(ScriptedProber::reachable()))
                .with_classifier(Arc::new(StaticClassifier::clean(&country)))
        }
    };

    Ok(builder.with_policy(policy).build()?)
}

/// Read a JSON safeguard policy file
pub fn load_safeguards(path: &Path) -> DaemonResult<SafeguardPolicy> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        DaemonError::Config(format!("Invalid safeguards file {}: {}", path.display(), e))
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
