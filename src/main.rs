//! axo-share binary: serves one directory until Ctrl+C or SIGTERM.

use axo_share::config::Args;
use axo_share::{FileServer, ServerError, logging};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    logging::init_logging();

    let args = Args::parse();
    let server = FileServer::new(args.server_config());
    let addr = server.start().await?;
    info!("🚀 Sharing {} at http://{}", server.config().root.display(), addr);

    shutdown_signal().await;
    server.stop().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
