//! Minimal liveness endpoint for hosting platforms that check HTTP.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

pub struct HealthServer {
    listener: TcpListener,
    started: Instant,
}

impl HealthServer {
    /// Binds synchronously so a taken port is reported before the watcher starts.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            started: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests on a background thread for the rest of the process.
    pub fn spawn(self) {
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "Health endpoint listening");
        }
        thread::spawn(move || {
            if let Err(err) = self.serve() {
                warn!(error = %err, "Health endpoint stopped");
            }
        });
    }

    fn serve(self) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(self.listener)?;
            axum::serve(listener, router(self.started)).await
        })
    }
}

fn router(started: Instant) -> Router {
    Router::new()
        .route("/health", get(health).fallback(not_found))
        .fallback(not_found)
        .with_state(started)
}

async fn health(State(started): State<Instant>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": started.elapsed().as_secs(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
