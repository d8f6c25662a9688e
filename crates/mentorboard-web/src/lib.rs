//! mentorboard-web - HTTP surface for mentorboard using Axum
//!
//! Dashboard reads for tenants, refresh triggers and queue inspection for
//! operators, and an SSE feed of refresh activity.

pub mod auth;
pub mod error;
pub mod router;
pub mod sse;

pub use router::create_router;

use anyhow::Result;
use mentorboard_core::DashboardService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the web server until `shutdown` resolves
pub async fn run(
    service: Arc<DashboardService>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(service);
    let listener = TcpListener::bind(addr).await?;

    info!("Web server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
