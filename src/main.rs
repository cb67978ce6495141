use std::sync::Arc;

use tokio::sync::Notify;

use autoqso::actuator::KeystrokeActuator;
use autoqso::config::Config;
use autoqso::daemon::{watchdog, AutoQso};
use autoqso::{publisher, udp};

#[tokio::main]
async fn main() {
    // Initialize logging - default to info level for our crate
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("autoqso=info,autoqso::udp=debug"),
    )
    .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // The only fatal startup condition: no feed, no daemon
    let socket = match udp::bind_socket(config.udp_port).await {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Failed to bind UDP port {}: {}", config.udp_port, e);
            std::process::exit(1);
        }
    };

    publisher::clear_files(&config.status_path, &config.command_path).await;

    let daemon = AutoQso::new(config, Arc::new(KeystrokeActuator::new()));
    let shutdown = Arc::new(Notify::new());

    tokio::spawn(udp::run_listener(socket, daemon.clone()));
    watchdog::spawn_all(&daemon);
    tokio::spawn(publisher::run(daemon.clone(), shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupt received, shutting down"),
        _ = shutdown.notified() => {}
    }
    daemon.shutdown().await;
}
