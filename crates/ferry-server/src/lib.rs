//! Ferry Server
//!
//! HTTP surface of ferry. Every workflow step is one of these requests:
//!
//! | Route | Caller |
//! |-------|--------|
//! | `POST /api/v1/export` | operators or a scheduler starting workflows |
//! | `POST /api/v1/export-job-check` | task queue, export status checks |
//! | `POST /api/v1/load-job-check` | task queue, load status checks |
//! | `POST /api/v1/storage-change-notify` | pub/sub push of written objects |
//! | `GET /api/v1/workflows[/{id}]` | read-back of workflow records |

mod ctx;
pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ferry_config::{EXPORT_CHECK_PATH, LOAD_CHECK_PATH};
use ferry_orchestrator::Orchestrator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use ctx::Ctx;

/// Build the router with every ferry route.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
  Router::new()
    .route("/", get(handlers::health))
    .route("/healthz", get(handlers::health))
    .route("/api/v1/export", post(handlers::export::handler))
    .route(EXPORT_CHECK_PATH, post(handlers::checks::export_check))
    .route(LOAD_CHECK_PATH, post(handlers::checks::load_check))
    .route("/api/v1/storage-change-notify", post(handlers::notify::handler))
    .route("/api/v1/workflows", get(handlers::workflows::get_all))
    .route("/api/v1/workflows/{id}", get(handlers::workflows::get_by_id))
    .with_state(Ctx { orchestrator })
}

/// Serve `app` on `at` until `cancel` fires, then finish in-flight requests.
pub async fn serve(at: SocketAddr, app: Router, cancel: CancellationToken) -> std::io::Result<()> {
  let listener = TcpListener::bind(at).await?;
  tracing::info!(addr = %listener.local_addr()?, "server_listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}
