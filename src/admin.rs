//! Admin endpoint
//!
//! RocksDB allows one process per database, so while `sieve` runs it owns
//! the contract store. Operators reach the store through this endpoint
//! instead: `contractctl --admin <URL>` posts the same commands it would
//! otherwise run locally. Writes made here are published on the store's
//! change feed like any other write.

use crate::cli::{execute, Commands};
use crate::store::RocksContractStore;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One `contractctl` command addressed to a chain.
#[derive(Serialize, Deserialize)]
pub struct AdminRequest {
    pub chain_id: u64,
    pub command: Commands,
}

#[derive(Clone)]
struct AdminState {
    store: Arc<RocksContractStore>,
}

async fn handle_command(
    State(state): State<AdminState>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let store = Arc::clone(&state.store);
    let outcome = tokio::task::spawn_blocking(move || {
        execute(store.as_ref(), request.chain_id, request.command)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => Ok(Json(result)),
        Ok(Err(e)) => {
            warn!("Admin command failed: {:#}", e);
            Err((StatusCode::BAD_REQUEST, Json(json!({ "error": format!("{:#}", e) }))))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Serve admin commands on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    store: Arc<RocksContractStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let router = Router::new()
        .route("/command", post(handle_command))
        .with_state(AdminState { store });

    info!("Admin endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Admin endpoint failed")?;
    info!("Admin endpoint stopped");
    Ok(())
}

/// Send a command to a running indexer's admin endpoint.
pub async fn send_command(base_url: &str, chain_id: u64, command: Commands) -> Result<Value> {
    let url = format!("{}/command", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&AdminRequest { chain_id, command })
        .send()
        .await
        .with_context(|| format!("Failed to reach admin endpoint at {}", url))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("Admin endpoint returned invalid JSON")?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("Admin command rejected ({}): {}", status, message);
    }
    Ok(body)
}
