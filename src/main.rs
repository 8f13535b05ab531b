use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatemesh::api;
use gatemesh::auther::GatewayAuther;
use gatemesh::cli;
use gatemesh::lifecycle::Lifecycle;
use gatemesh::mesh::{HttpMeshConnector, MeshEngine, MeshStores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatemesh=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings()?;
    let listen_address: IpAddr = settings
        .listen_address
        .parse()
        .with_context(|| format!("Invalid ip address {}", settings.listen_address))?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    let lifecycle = Arc::new(Lifecycle::new());
    let stores = MeshStores::in_memory(&settings);
    lifecycle.register_trim(Arc::new(stores.credentials.clone()));

    let auther = GatewayAuther::new(
        stores.credentials.clone(),
        settings.internal_credential.clone(),
    );
    if !auther.has_internal_credential() {
        warn!("No internal credential configured; mesh RPCs cannot be signed or verified");
    }
    let connector = HttpMeshConnector::new(
        auther.clone(),
        settings.sync_connect_timeout(),
        settings.sync_read_timeout(),
    )?;
    let engine = Arc::new(MeshEngine::new(&settings, stores, Arc::new(connector)));
    if let Some(queue) = engine.change_queue().cloned() {
        lifecycle.on_shutdown("change-queue", move || {
            let pending = queue.pending_len();
            if pending > 0 {
                warn!("{} changed objects were never replicated", pending);
            }
        });
    }

    let gossip = tokio::spawn(engine.clone().run(lifecycle.shutdown_signal()));
    tokio::spawn(engine.clone().run_bootstrap(lifecycle.shutdown_signal()));

    let app = api::api(api::AppState::new(engine, auther, lifecycle.clone()));

    // Start server
    info!("Starting {} on {}", settings.node_id, socket_address);
    let mut shutdown = lifecycle.shutdown_signal();
    let server = axum::Server::bind(&socket_address)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });

    let signal_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_lifecycle.shutdown();
        }
    });

    server.await?;
    lifecycle.shutdown();
    // let an in-flight cycle finish
    if tokio::time::timeout(settings.sync_read_timeout(), gossip)
        .await
        .is_err()
    {
        warn!("Gossip loop did not stop in time");
    }
    Ok(())
}
