//! Sync Storage Server for Sync 1.5, backed by per-user SQLite stores
#[macro_use]
extern crate slog_scope;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use syncshard::logging::{init_logging, reset_logging};
use syncshard::server;
use syncshard::settings::Settings;

const USAGE: &str = "
Usage: syncshard [options]

Options:
    -h, --help               Show this message.
    --config=CONFIGFILE      Syncshard configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let settings = Settings::with_env_and_config_file(args.flag_config.as_deref())?;
    init_logging(!settings.human_logs).expect("Logging failed to initialize");
    debug!("Starting up...");

    // Setup and run the server
    let banner = settings.banner();
    let (server, pool) = server::Server::with_settings(settings)
        .await
        .expect("Could not start server");
    info!("Server running on {}", banner);
    server.await?;
    info!("Server closing");

    // new requests were already refused by the time the server future
    // resolves; wait out in-flight requests and close every store
    pool.stop_all().await;
    reset_logging();

    Ok(())
}
