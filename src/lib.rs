#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, HttpClientFairing};
use crate::logging::LoggerFairing;

pub mod api;
mod config;
pub mod environment;
pub mod error;
mod logging;
pub mod model;

pub use config::Config;

/// Assemble the server: fairings for config, database and the Asana HTTP
/// client, the credential relay routes at `/` and the voting app at
/// `/voting`.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(HttpClientFairing)
        .mount("/", api::routes())
        .mount("/voting", api::voting_routes())
}
