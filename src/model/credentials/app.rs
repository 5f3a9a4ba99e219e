use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::{errors::is_duplicate_key_error, key_filter, Coll};

/// The application's OAuth client record. Read-only once bootstrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentials {
    #[serde(rename = "_id")]
    pub key: String,
    pub client_secret: String,
    pub redirect_urls: Vec<String>,
}

impl AppCredentials {
    pub fn key(app_id: &str) -> String {
        format!("app_credentials_{app_id}")
    }

    /// Look up the credentials for `app_id`, if any are stored.
    pub async fn find(credentials: &Coll<AppCredentials>, app_id: &str) -> Result<Option<Self>> {
        Ok(credentials
            .find_one(key_filter(&Self::key(app_id)), None)
            .await?)
    }

    /// Load the credentials for `app_id`.
    pub async fn load(credentials: &Coll<AppCredentials>, app_id: &str) -> Result<Self> {
        Self::find(credentials, app_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Application credentials for {app_id}")))
    }

    /// Store the credentials for `app_id` unless some already exist.
    ///
    /// Returns whether anything was written. Existing records are never
    /// overwritten.
    pub async fn bootstrap(
        credentials: &Coll<AppCredentials>,
        app_id: &str,
        client_secret: String,
        redirect_urls: Vec<String>,
    ) -> Result<bool> {
        let record = Self {
            key: Self::key(app_id),
            client_secret,
            redirect_urls,
        };
        match credentials.insert_one(&record, None).await {
            Ok(_) => {
                info!("Bootstrapped application credentials for {app_id}");
                Ok(true)
            }
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `url` is one of the registered redirect URLs.
    pub fn allows_redirect(&self, url: &str) -> bool {
        self.redirect_urls.iter().any(|allowed| allowed == url)
    }

    /// The public view of these credentials.
    pub fn info(&self, app_id: &str) -> AppCredentialsInfo {
        AppCredentialsInfo {
            client_id: app_id.to_string(),
            redirect_urls: self.redirect_urls.clone(),
        }
    }
}

/// Application credentials without the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentialsInfo {
    pub client_id: String,
    pub redirect_urls: Vec<String>,
}
