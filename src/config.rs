use std::time::Duration;

use log::{error, info, warn};
use mongodb::Client as MongoClient;
use reqwest::Client as HttpClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{
    credentials::{AppCredentials, BasicAuthUser},
    mongodb::{ensure_indexes_exist, Coll},
};

/// Upper bound on any single request to Asana.
const HTTP_TIMEOUT_SECONDS: u64 = 15;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    asana_app_id: String,
    asana_authorize_url: String,
    asana_token_url: String,
    // secrets
    state_secret: String,
    password_pepper: String,
}

impl Config {
    /// Asana OAuth client ID. This is also the key of the application
    /// credentials record.
    pub fn asana_app_id(&self) -> &str {
        &self.asana_app_id
    }

    /// Where users are sent to grant us access.
    pub fn asana_authorize_url(&self) -> &str {
        &self.asana_authorize_url
    }

    /// Token endpoint for code exchange and refresh.
    pub fn asana_token_url(&self) -> &str {
        &self.asana_token_url
    }

    /// Secret key used to sign OAuth `state` parameters.
    pub fn state_secret(&self) -> &[u8] {
        self.state_secret.as_bytes()
    }

    /// Application-wide pepper appended to basic auth passwords before hashing.
    pub fn password_pepper(&self) -> &str {
        &self.password_pepper
    }
}

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self {
            asana_app_id: "1163630087121140".to_string(),
            asana_authorize_url: "https://app.asana.com/-/oauth_authorize".to_string(),
            asana_token_url: "https://app.asana.com/-/oauth_token".to_string(),
            state_secret: "test-state-secret".to_string(),
            password_pepper: "test-pepper".to_string(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // non-secrets
    asana_app_id: String,
    #[serde(default)]
    asana_redirect_urls: Vec<String>,
    #[serde(default)]
    basic_auth_username: Option<String>,
    // secrets
    db_uri: String,
    asana_client_secret: Option<String>,
    password_pepper: String,
    #[serde(default)]
    basic_auth_password: Option<String>,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(&config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }

        // Bootstrap the application credentials if a secret was supplied.
        match config.asana_client_secret {
            Some(secret) => {
                let credentials = Coll::<AppCredentials>::from_db(&db);
                if let Err(e) = AppCredentials::bootstrap(
                    &credentials,
                    &config.asana_app_id,
                    secret,
                    config.asana_redirect_urls,
                )
                .await
                {
                    error!("Failed to bootstrap application credentials: {e}");
                    return Err(rocket);
                }
            }
            None => warn!("No `asana_client_secret` configured, expecting existing app credentials"),
        }

        // Ensure the configured basic auth user exists.
        if let (Some(username), Some(password)) =
            (&config.basic_auth_username, &config.basic_auth_password)
        {
            let users = Coll::<BasicAuthUser>::from_db(&db);
            if let Err(e) =
                ensure_basic_auth_user_exists(&users, username, password, &config.password_pepper)
                    .await
            {
                error!("Failed to create basic auth user {username}: {e}");
                return Err(rocket);
            }
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Create the given basic auth user unless one with that name already exists.
/// An existing user keeps their current password.
async fn ensure_basic_auth_user_exists(
    users: &Coll<BasicAuthUser>,
    username: &str,
    password: &str,
    pepper: &str,
) -> Result<()> {
    if BasicAuthUser::load(users, username).await?.is_some() {
        return Ok(());
    }
    let user = BasicAuthUser::new(username, password, pepper)?;
    BasicAuthUser::create(users, &user).await?;
    info!("Created basic auth user {username}");
    Ok(())
}

/// A fairing that builds the HTTP client used to talk to Asana and places it
/// into managed state.
pub struct HttpClientFairing;

#[rocket::async_trait]
impl Fairing for HttpClientFairing {
    fn info(&self) -> Info {
        Info {
            name: "Asana HTTP client",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let client = match HttpClient::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build HTTP client: {e}");
                return Err(rocket);
            }
        };
        info!("Built Asana HTTP client");
        Ok(rocket.manage(client))
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "workabout".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}
