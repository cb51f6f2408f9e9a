use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tracing::{error, info};

use crate::server::{
    reconcile::{ReconcilePolicy, Reconciler},
    routes::{build_router, AppState},
    store::UsageStore,
};

pub mod args;
pub mod reconcile;
pub mod routes;
pub mod store;

/// Represents the starting point for the reconciliation server.
pub async fn start_server(args: args::ServerArgs) -> Result<()> {
    let dir = args
        .dir
        .map_or_else(crate::utils::dir::create_application_default_path, Ok)?;

    let store = UsageStore::open(dir.join("server_state.json")).await;
    let state = Arc::new(AppState {
        store,
        reconciler: Reconciler::new(ReconcilePolicy::default()),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");

    let serve_state = state.clone();
    axum::serve(listener, build_router(serve_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Final snapshot on clean shutdown.
    if let Err(e) = state.store.persist().await {
        error!("Couldn't write final snapshot {e:?}");
    }
    Ok(())
}
