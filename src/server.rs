//! HTTP interface
//!
//! `GET /` serves the current chain, `POST /` offers a chain to the
//! fork-choice rule and answers 201 if it was adopted, 400 if not. The POST
//! body is parsed as JSON whatever its declared content type.

use crate::chain::Chain;
use crate::node::NodeHandle;
use crate::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Largest accepted chain upload
const MAX_CHAIN_BODY: usize = 64 * 1024 * 1024;

/// Build the node's HTTP router
pub fn router(node: NodeHandle) -> Router {
    Router::new()
        .route("/", get(get_chain).post(post_chain))
        .layer(DefaultBodyLimit::max(MAX_CHAIN_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn get_chain(State(node): State<NodeHandle>) -> Json<Arc<Chain>> {
    Json(node.chain())
}

async fn post_chain(State(node): State<NodeHandle>, body: Bytes) -> StatusCode {
    let chain: Chain = match serde_json::from_slice(&body) {
        Ok(chain) => chain,
        Err(e) => {
            debug!("Rejected unparsable chain body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let blocks = chain.len();
    match node.adopt(chain).await {
        Ok(true) => StatusCode::CREATED,
        Ok(false) => {
            debug!("Rejected offered chain of {} blocks", blocks);
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            warn!(category = e.category(), "Could not process offered chain: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serve `node` on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    node: NodeHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Serving chain on http://{}", listener.local_addr()?);

    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
