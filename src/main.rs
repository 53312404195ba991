use question_import::{build_state, import_idle_timeout, routes::build_router};
use std::net::{IpAddr, SocketAddr};
use tracing_subscriber::EnvFilter;

fn listen_addr() -> anyhow::Result<SocketAddr> {
    let host: IpAddr = std::env::var("BACKEND_HOST")
        .unwrap_or_else(|_| "0.0.0.0".to_string())
        .parse()?;
    let port: u16 = match std::env::var("BACKEND_PORT") {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse()?,
        _ => 8080,
    };
    Ok(SocketAddr::new(host, port))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let state = build_state()?;
    let idle = import_idle_timeout()?;
    if idle.is_zero() {
        tracing::warn!("IMPORT_IDLE_SECS=0, abandoned import sessions are kept until restart");
    } else {
        tokio::spawn(state.clone().sweep_idle_forever(idle));
    }

    let addr = listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, idle_secs = idle.as_secs(), "question import backend listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
