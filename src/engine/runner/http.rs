use std::net::SocketAddr;
use std::thread;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::routing::get;
use camino::Utf8Path;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;

/// Mounts the build directory under `base` and redirects `/` to it.
pub fn router(build: &Utf8Path, base: &str) -> Router {
    let serve = ServeDir::new(build);
    let base = format!("/{}", base.trim_matches('/'));

    if base == "/" {
        return Router::new().fallback_service(serve);
    }

    let target = base.clone();
    Router::new()
        .route(
            "/",
            get(move || async move { (StatusCode::FOUND, [(header::LOCATION, target)]) }),
        )
        .nest_service(&base, serve)
}

/// Starts the server on a background thread with its own runtime.
pub fn start(config: &Config) -> thread::JoinHandle<anyhow::Result<()>> {
    let config = config.clone();
    thread::spawn(move || {
        let result = serve_blocking(&config);
        if let Err(e) = &result {
            tracing::error!("dev server stopped: {e:#}");
        }
        result
    })
}

/// Serves the build directory until the process is killed.
pub fn serve_blocking(config: &Config) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(bind_and_serve(config))
}

async fn bind_and_serve(config: &Config) -> anyhow::Result<()> {
    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(
        url = %style(format!("http://{address}{}", config.server.base)).yellow(),
        "serving {}",
        config.paths.build
    );

    serve(listener, router(&config.build_dir(), &config.server.base)).await
}

async fn serve(listener: tokio::net::TcpListener, router: Router) -> anyhow::Result<()> {
    axum::serve(listener, router).await?;
    Ok(())
}
