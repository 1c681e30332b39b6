//! courier server binary.
//!
//! Wires the sidecar supervisor, engine registry, session manager, and HTTP
//! gateway together and runs until interrupted.

mod config;

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    clap::Parser,
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

use {
    courier_engine::{EngineKind, EngineRegistry, MemoryAuthStore, MemoryIdentityStore},
    courier_gateway::router,
    courier_sessions::{ManagerConfig, SessionManager, Timings},
    courier_sidecar::{ControlEndpoint, SidecarEngineFactory, SidecarSupervisor, SupervisorConfig},
};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();
    let endpoint = ControlEndpoint::parse(&config.sidecar_endpoint);

    let supervisor = SidecarSupervisor::new(SupervisorConfig {
        binary: config.sidecar_bin.clone(),
        args: config.sidecar_args.clone(),
        ..SupervisorConfig::new(endpoint.clone())
    });
    // A missing or bogus control endpoint is fatal here, before anything
    // else comes up.
    supervisor.launch().await?;

    let mut sidecar_exits = supervisor.subscribe_exit();
    let _ = tokio::spawn(async move {
        if let Ok(code) = sidecar_exits.recv().await {
            error!(?code, "sidecar exited unexpectedly, terminating");
            std::process::exit(1);
        }
    });

    let engines = Arc::new(EngineRegistry::new());
    engines.register(
        EngineKind::Sidecar,
        Arc::new(SidecarEngineFactory::new(
            Arc::clone(&supervisor),
            endpoint,
        )),
    );

    let manager = SessionManager::new(
        ManagerConfig {
            timings: Timings::default(),
            global_webhook: config.global_webhook(),
            predefined: config.predefined_sessions.clone(),
            environment: serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
            }),
        },
        engines,
        Arc::new(MemoryAuthStore::new()),
        Arc::new(MemoryIdentityStore::new()),
    )
    .await;

    manager.start_predefined().await;

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(addr = %listener.local_addr()?, "courier listening");

    axum::serve(listener, router(Arc::clone(&manager)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    manager.stop_all().await;
    supervisor.shutdown().await;
    info!("bye");
    Ok(())
}
