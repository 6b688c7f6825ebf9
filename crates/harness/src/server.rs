//! Asset server - serves the output directory to the browser

use axum::handler::HandlerWithoutStateExt;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use pagerun_common::{Error, Result};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Handle to a running asset server
pub struct AssetServer {
    root: PathBuf,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl AssetServer {
    /// Serve `root` on an ephemeral loopback port
    pub async fn start(root: &Path) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Server(format!("bind failed: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Server(format!("no local address: {}", e)))?;

        let (tx, rx) = oneshot::channel::<()>();
        let app = router(root);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        info!("Serving {} at http://{}", root.display(), addr);

        Ok(Self {
            root: root.to_path_buf(),
            addr,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    /// Base URL, without trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop serving; later calls do nothing
    pub async fn stop(&mut self) -> Result<()> {
        let Some(tx) = self.shutdown.take() else {
            return Ok(());
        };
        info!("Stopping asset server (port {})", self.port());
        let _ = tx.send(());

        if let Some(task) = self.task.take() {
            match timeout(STOP_GRACE, task).await {
                Ok(Ok(Ok(()))) => debug!("Asset server stopped"),
                Ok(Ok(Err(e))) => return Err(Error::Server(e.to_string())),
                Ok(Err(e)) => return Err(Error::Server(format!("server task failed: {}", e))),
                Err(_) => warn!("Asset server still draining after {:?}", STOP_GRACE),
            }
        }
        Ok(())
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Static files from `root`, `index.html` for directories, `Nope` otherwise
pub fn router(root: &Path) -> Router {
    let files = ServeDir::new(root)
        .append_index_html_on_directories(true)
        .not_found_service(not_found.into_service());

    Router::new()
        .fallback_service(files)
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Nope")
}
