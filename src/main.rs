use actix_web::{web, App, HttpServer};
use log::{info, warn};
use std::io;
use std::path::Path;

use mediastore::api;
use mediastore::app_state::AppState;
use mediastore::config::AppConfig;
use mediastore::error::ServiceError;
use mediastore::housekeeping::Scheduler;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Could not load config.yaml ({}), using defaults", e);
        AppConfig::default()
    });
    init_logging(&config);

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = AppState::from_config(config).map_err(to_io)?;

    // Settle rows orphaned by a previous crash before accepting traffic.
    let zombies = state.ctx.repo.fix_zombie_entries().map_err(to_io)?;
    if zombies > 0 {
        warn!(
            "Recovered {} entries stuck in processing; marked as error",
            zombies
        );
    }

    Scheduler::spawn(
        state.ctx.repo.clone(),
        state.ctx.store.clone(),
        state.locks.clone(),
    );

    let data = web::Data::new(state);
    info!("Listening on {}:{}", host, port);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(api::configure))
        .bind((host.as_str(), port))?
        .run()
        .await
}

fn init_logging(config: &AppConfig) {
    let path = &config.logging.config_file;
    if Path::new(path).exists() {
        if let Err(e) = log4rs::init_file(path, Default::default()) {
            let _ = env_logger::try_init();
            warn!("Logging config {} rejected ({}), using env_logger", path, e);
        }
    } else {
        let _ = env_logger::try_init();
    }
}

fn to_io(err: ServiceError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}
