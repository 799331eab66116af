use std::{net::SocketAddr, thread};

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serve `root` over HTTP on a background thread with its own runtime.
pub fn start(root: Utf8PathBuf, port: u16) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(root, port))
    })
}

fn router(root: &Utf8PathBuf) -> Router {
    // Static files only, `index.html` is served for directories.
    Router::new().fallback_service(ServeDir::new(root))
}

async fn serve(root: Utf8PathBuf, port: u16) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    axum::serve(address, router(&root)).await?;

    Ok(())
}
