use log::{debug, warn};
use reqwest::{Client as HttpClient, Url};
use rocket::http::Status;

use crate::error::{Error, Result};
use crate::model::credentials::AppCredentials;
use crate::Config;

use super::TokenSet;

/// The two OAuth grants we need from Asana, for one registered application.
pub struct AsanaClient<'a> {
    config: &'a Config,
    app: &'a AppCredentials,
    http: &'a HttpClient,
}

impl<'a> AsanaClient<'a> {
    pub fn new(config: &'a Config, app: &'a AppCredentials, http: &'a HttpClient) -> Self {
        Self { config, app, http }
    }

    /// Where to send the user to grant us access.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        if !self.app.allows_redirect(redirect_uri) {
            return Err(Error::bad_request(format!(
                "Redirect URI is not registered: {redirect_uri}"
            )));
        }
        let url = Url::parse_with_params(
            self.config.asana_authorize_url(),
            &[
                ("response_type", "code"),
                ("client_id", self.config.asana_app_id()),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|e| {
            Error::Status(
                Status::InternalServerError,
                format!("Bad `asana_authorize_url`: {e}"),
            )
        })?;
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        debug!("Exchanging authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.config.asana_app_id()),
            ("client_secret", self.app.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ])
        .await
    }

    /// Get a new access token with a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        debug!("Refreshing access token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.config.asana_app_id()),
            ("client_secret", self.app.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let resp = self
            .http
            .post(self.config.asana_token_url())
            .form(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!("Asana token endpoint returned {status}: {body}");
            return Err(Error::Status(
                Status::BadGateway,
                format!("Asana token request failed with {status}"),
            ));
        }

        Ok(resp.json().await?)
    }
}
