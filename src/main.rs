use log::{error, info, warn, LevelFilter};
use mongodb::Database;
use rocket::{Error as RocketError, Ignite, Rocket};
use thiserror::Error;
use workabout_backend::{
    error::Error as BackendError,
    model::{credentials::AppCredentials, mongodb::Coll},
    Config,
};

/// Errors that are critical to the entire server.
#[derive(Debug, Error)]
enum Error {
    #[error("Server ignited without its {0}")]
    MissingState(&'static str),
    #[error("Failed to read the Asana app credentials during launch: {0}")]
    AppCredentials(#[from] BackendError),
    #[error(transparent)]
    RocketError(#[from] RocketError),
}

async fn run() -> Result<(), Error> {
    info!("Configuring server...");
    let rocket = workabout_backend::build().ignite().await?;
    info!("...server configured!");
    report_asana_app(&rocket).await?;
    let protocol = if rocket.config().tls_enabled() {
        "https"
    } else {
        "http"
    };
    let ip = &rocket.config().address;
    let port = &rocket.config().port;
    info!("Credential relay on {protocol}://{ip}:{port}/, voting app under /voting");
    // Disable rocket logging from now on.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    let _ = rocket.launch().await?;
    Ok(())
}

/// Log which Asana app the relay signs users in to.
///
/// Missing credentials are not fatal; they can be stored while the server runs.
async fn report_asana_app(rocket: &Rocket<Ignite>) -> Result<(), Error> {
    let config = rocket
        .state::<Config>()
        .ok_or(Error::MissingState("configuration"))?;
    let db = rocket
        .state::<Database>()
        .ok_or(Error::MissingState("database"))?;
    let app_id = config.asana_app_id();
    match AppCredentials::find(&Coll::from_db(db), app_id).await? {
        Some(app) => info!(
            "Relaying for Asana app {app_id} ({} redirect url(s) registered)",
            app.redirect_urls.len()
        ),
        None => warn!("No credentials stored for Asana app {app_id}; sign-in fails until they are"),
    }
    Ok(())
}

#[rocket::main]
async fn main() {
    // Set up logging.
    log4rs::init_file("log4rs.yaml", log4rs_dynamic_filters::default_deserializers())
        .expect("Failed to initialise logging");
    info!("Initialised logging");

    // Launch server.
    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
