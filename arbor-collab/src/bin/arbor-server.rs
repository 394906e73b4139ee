//! Standalone sync server.
//!
//! Configuration comes from the environment:
//! `PORT` (3000), `WS_PORT` (3001), `ARBOR_BIND_HOST` (127.0.0.1),
//! `ARBOR_STORAGE_PATH` (unset = in-memory), `ARBOR_BROADCAST_CAPACITY` (256).

use arbor_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    let server = match SyncServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to open snapshot store: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
