use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing_subscriber::EnvFilter;
use vicinity_core::config;
use vicinity_core::storage::IndexManager;
use vicinity_server::proto::vicinity_server::VicinityServer;
use vicinity_server::VicinityService;

#[derive(Parser)]
#[command(name = "vicinity", about = "HNSW vector-similarity gRPC server")]
struct Args {
    /// Server binding address and port
    #[arg(long, default_value = config::DEFAULT_ADDRESS)]
    address: String,

    /// Path to the indices folder
    #[arg(long, default_value = config::DEFAULT_DATA_DIR)]
    data: String,

    /// Whether to serve with TLS
    #[arg(long, default_value_t = false)]
    tls: bool,

    /// TLS certificate file
    #[arg(long, default_value = "server.crt")]
    tls_cert: String,

    /// TLS private key file
    #[arg(long, default_value = "server.key")]
    tls_key: String,

    /// Set the log level to debug
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let addr: SocketAddr = match args.address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Error: invalid --address '{}': {}", args.address, e);
            std::process::exit(1);
        }
    };

    let manager = Arc::new(IndexManager::new(&args.data));
    if let Err(e) = manager.load_all() {
        eprintln!("Error: failed to load indices from '{}': {}", args.data, e);
        std::process::exit(1);
    }

    let mut builder = Server::builder();
    if args.tls {
        tracing::info!(cert = %args.tls_cert, key = %args.tls_key, "TLS enabled");
        let cert = std::fs::read_to_string(&args.tls_cert).map_err(|e| {
            format!("failed to read TLS cert '{}': {e}", args.tls_cert)
        })?;
        let key = std::fs::read_to_string(&args.tls_key).map_err(|e| {
            format!("failed to read TLS key '{}': {e}", args.tls_key)
        })?;
        builder = builder.tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))?;
    }

    let service = VicinityService::new(Arc::clone(&manager));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %addr,
        data = %args.data,
        tls = args.tls,
        indices = manager.len(),
        "vicinity ready"
    );

    builder
        .add_service(VicinityServer::new(service))
        .serve_with_shutdown(addr, wait_for_signal())
        .await?;

    flush_all(&manager);
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}

/// Snapshot every index on the way out so a clean shutdown leaves no WAL
/// to replay. Failures are logged; the WAL still covers those indices.
fn flush_all(manager: &IndexManager) {
    for name in manager.names() {
        match manager.persist(&name) {
            Ok(()) => tracing::info!(index = %name, "flushed on shutdown"),
            Err(e) => tracing::error!(index = %name, error = %e, "shutdown flush failed"),
        }
    }
}
