//! iecsimd - daemon entry point.
//!
//! Parses flags, wires process supervision and logging, starts the RPC
//! server and runs until SIGTERM/SIGINT.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use iecsim::config::{parse_args, LoggingConfig};
use iecsim::ipc::IpcServer;
use iecsim::registry::{BackendContext, SharedContext};
use iecsim::system::logging::init_logging;
use iecsim::system::process::arm_parent_death_signal;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args);

    if config.show_version {
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        println!("Commit: {}", env!("IECSIM_GIT_COMMIT"));
        println!("Build Time: {}", env!("IECSIM_BUILD_TIMESTAMP"));
        return;
    }

    if config.pdeathsig && !arm_parent_death_signal() {
        // Parent is already gone; refuse to run unsupervised.
        std::process::exit(1);
    }

    let logging = init_logging(&LoggingConfig::load(&config.logging_config));
    let _guard = logging.guard;
    if let Some(warning) = logging.warning {
        warn!("{}", warning);
    }

    info!("iecsimd starting");
    info!(
        "Version: {} ({}) at {}",
        env!("CARGO_PKG_VERSION"),
        env!("IECSIM_GIT_COMMIT"),
        env!("IECSIM_BUILD_TIMESTAMP")
    );
    info!("Socket: {}", config.socket_path);
    info!(
        "Parent death signal: {}",
        if config.pdeathsig { "enabled" } else { "disabled" }
    );

    let context: SharedContext = Arc::new(tokio::sync::Mutex::new(BackendContext::new()));
    let mut server = IpcServer::new(&config.socket_path, config.workers);

    if let Err(e) = server.start(context).await {
        error!("Failed to start IPC server: {}", e);
        std::process::exit(1);
    }
    info!("IPC server started at {}", config.socket_path);

    wait_for_shutdown().await;

    warn!("Shutdown signal received, stopping IPC server...");
    server.stop().await;
}

async fn wait_for_shutdown() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
