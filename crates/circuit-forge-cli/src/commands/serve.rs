use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use circuit_forge_core::store::JsonFileStore;
use circuit_forge_core::ForgeConfig;
use circuit_forge_server::AppState;

use crate::output;

/// Serve `GET /api/script/{id}/circuit_input` until Ctrl-C.
pub async fn run(config: ForgeConfig, addr: SocketAddr, store_path: &Path) -> Result<()> {
    output::print_header("circuit-forge serve");

    let store = JsonFileStore::open(store_path)?;
    output::print_key_value("Listen", &addr.to_string());
    output::print_key_value("Store", &store_path.display().to_string());
    output::print_key_value("Code root", &config.code_output_root.display().to_string());

    let state = AppState::new(Arc::new(store), config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    circuit_forge_server::serve(addr, state, shutdown)
        .await
        .with_context(|| format!("serving on {addr}"))?;
    output::print_success("Server stopped");
    Ok(())
}
