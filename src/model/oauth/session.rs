use chrono::Utc;
use log::{info, warn};
use reqwest::Client as HttpClient;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};

use crate::error::{Error, Result};
use crate::model::{
    credentials::{AppCredentials, UserCredentials},
    mongodb::Coll,
};
use crate::Config;

use super::AsanaClient;

/// Private cookie naming the Asana user signed in on this browser.
pub const USER_COOKIE: &str = "asana_user";

/// Load a user's credentials, refreshing the access token first if it has
/// expired (or unconditionally, with `force`).
pub async fn fresh_credentials(
    config: &Config,
    http: &HttpClient,
    app_credentials: &Coll<AppCredentials>,
    user_credentials: &Coll<UserCredentials>,
    user_id: &str,
    force: bool,
) -> Result<UserCredentials> {
    let credentials = UserCredentials::load(user_credentials, user_id).await?;
    let now = Utc::now();
    if !force && !credentials.is_expired(now) {
        return Ok(credentials);
    }

    let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
        Error::Status(
            Status::Unauthorized,
            format!("No refresh token for user {user_id}; authorize again"),
        )
    })?;
    let app = AppCredentials::load(app_credentials, config.asana_app_id()).await?;
    let tokens = AsanaClient::new(config, &app, http)
        .refresh(refresh_token)
        .await?;
    info!("Refreshed Asana access token for user {user_id}");
    UserCredentials::store(user_credentials, user_id, &tokens, now).await
}

/// Request guard for routes that act on Asana as the signed-in user.
/// Guarantees an unexpired access token.
pub struct AsanaSession {
    pub user_id: String,
    pub access_token: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AsanaSession {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let user_id = match req.cookies().get_private(USER_COOKIE) {
            Some(cookie) => cookie.value().to_string(),
            None => {
                let status = Status::Unauthorized;
                let error = Error::Status(status, "Not signed in to Asana".to_string());
                return Outcome::Failure((status, error));
            }
        };

        // Unwraps are safe as all of these are always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();
        let http = req.guard::<&State<HttpClient>>().await.unwrap();
        let apps = req.guard::<Coll<AppCredentials>>().await.unwrap();
        let users = req.guard::<Coll<UserCredentials>>().await.unwrap();

        match fresh_credentials(config, http, &apps, &users, &user_id, false).await {
            Ok(UserCredentials {
                access_token: Some(access_token),
                ..
            }) => Outcome::Success(AsanaSession {
                user_id,
                access_token,
            }),
            Ok(_) => {
                let status = Status::Unauthorized;
                let error = Error::Status(status, format!("No access token for user {user_id}"));
                Outcome::Failure((status, error))
            }
            Err(e) => {
                warn!("Could not load Asana session for {user_id}: {e}");
                Outcome::Failure((e.status(), e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::local::asynchronous::Client;

    use super::super::stub;
    use super::*;

    async fn refresh_for(
        client: &Client,
        apps: &Coll<AppCredentials>,
        users: &Coll<UserCredentials>,
        force: bool,
    ) -> Result<UserCredentials> {
        let config = client.rocket().state::<Config>().unwrap();
        let http = client.rocket().state::<HttpClient>().unwrap();
        fresh_credentials(config, http, apps, users, "1204", force).await
    }

    #[backend_test(asana_stub)]
    async fn expired_tokens_are_refreshed(
        apps: Coll<AppCredentials>,
        users: Coll<UserCredentials>,
        client: Client,
    ) {
        let expired = UserCredentials::example(Some(Utc::now() - Duration::hours(1)));
        users.insert_one(&expired, None).await.unwrap();

        let fresh = refresh_for(&client, &apps, &users, false).await.unwrap();
        assert_eq!(fresh.access_token.as_deref(), Some(stub::REFRESHED_ACCESS_TOKEN));
        // The endpoint sent no new refresh token, so the old one stays.
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh"));
        assert!(!fresh.is_expired(Utc::now()));
        assert_eq!(UserCredentials::load(&users, "1204").await.unwrap(), fresh);
    }

    #[backend_test(asana_stub)]
    async fn unexpired_tokens_are_left_alone(
        client: Client,
        apps: Coll<AppCredentials>,
        users: Coll<UserCredentials>,
    ) {
        let current = UserCredentials::example(Some(Utc::now() + Duration::hours(1)));
        users.insert_one(&current, None).await.unwrap();

        let loaded = refresh_for(&client, &apps, &users, false).await.unwrap();
        assert_eq!(loaded, current);

        let forced = refresh_for(&client, &apps, &users, true).await.unwrap();
        assert_eq!(forced.access_token.as_deref(), Some(stub::REFRESHED_ACCESS_TOKEN));
    }

    #[backend_test(asana_stub)]
    async fn refused_refresh_is_bad_gateway(
        client: Client,
        apps: Coll<AppCredentials>,
        users: Coll<UserCredentials>,
    ) {
        let mut revoked = UserCredentials::example(Some(Utc::now() - Duration::hours(1)));
        revoked.refresh_token = Some(stub::REVOKED_REFRESH_TOKEN.to_string());
        users.insert_one(&revoked, None).await.unwrap();

        let err = refresh_for(&client, &apps, &users, false).await.unwrap_err();
        assert_eq!(err.status(), Status::BadGateway);
        // Nothing was overwritten.
        assert_eq!(UserCredentials::load(&users, "1204").await.unwrap(), revoked);
    }

    #[backend_test]
    async fn no_refresh_token_means_reauthorize(
        client: Client,
        apps: Coll<AppCredentials>,
        users: Coll<UserCredentials>,
    ) {
        let mut stranded = UserCredentials::example(Some(Utc::now() - Duration::hours(1)));
        stranded.refresh_token = None;
        users.insert_one(&stranded, None).await.unwrap();

        let err = refresh_for(&client, &apps, &users, false).await.unwrap_err();
        assert_eq!(err.status(), Status::Unauthorized);
    }
}
