use chrono::Utc;
use log::info;
use reqwest::Client as HttpClient;
use rocket::{
    http::{Cookie, CookieJar, SameSite, Status},
    response::Redirect,
    serde::json::Json,
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        credentials::{AppCredentials, AppCredentialsInfo, BasicAuth, BasicAuthUser, UserCredentials},
        mongodb::Coll,
        oauth::{
            fresh_credentials, AsanaClient, AsanaSession, OAuthState, PendingAuthorization,
            STATE_COOKIE, USER_COOKIE,
        },
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![
        credential_info,
        authorize,
        oauth_redirect,
        refresh,
        sign_out,
        create_user,
    ]
}

/// The signed-in Asana user, as reported back to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIn {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Access token expiry in milliseconds since the epoch.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl SignedIn {
    fn new(credentials: &UserCredentials, name: Option<String>) -> Self {
        Self {
            user_id: credentials.user_id.clone(),
            name,
            expires_at: credentials.expires_at().map(|t| t.timestamp_millis()),
        }
    }
}

/// Request body for adding a basic auth user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

#[get("/credential_info")]
async fn credential_info(
    config: &State<Config>,
    apps: Coll<AppCredentials>,
) -> Result<Json<AppCredentialsInfo>> {
    let app = AppCredentials::load(&apps, config.asana_app_id()).await?;
    Ok(Json(app.info(config.asana_app_id())))
}

#[get("/oauth/authorize?<redirect_uri>")]
async fn authorize(
    redirect_uri: String,
    config: &State<Config>,
    http: &State<HttpClient>,
    apps: Coll<AppCredentials>,
    cookies: &CookieJar<'_>,
) -> Result<Redirect> {
    let app = AppCredentials::load(&apps, config.asana_app_id()).await?;
    let state = OAuthState::random().sign(config.state_secret())?;
    let url = AsanaClient::new(config, &app, http).authorize_url(&redirect_uri, &state)?;

    let pending = PendingAuthorization {
        state,
        redirect_uri,
    };
    cookies.add_private(pending.into_cookie()?);
    Ok(Redirect::to(url))
}

#[allow(clippy::too_many_arguments)]
#[get("/asana_oauth_redirect?<code>&<state>&<error>")]
async fn oauth_redirect(
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    config: &State<Config>,
    http: &State<HttpClient>,
    apps: Coll<AppCredentials>,
    users: Coll<UserCredentials>,
    cookies: &CookieJar<'_>,
) -> Result<Json<SignedIn>> {
    // Whatever happens next, this authorization attempt is over.
    let pending = cookies
        .get_private(STATE_COOKIE)
        .ok_or_else(|| Error::bad_request("No authorization in progress"))?;
    cookies.remove_private(Cookie::named(STATE_COOKIE));
    let pending = PendingAuthorization::from_cookie(&pending)?;

    if let Some(error) = error {
        return Err(Error::Status(
            Status::Forbidden,
            format!("Asana declined authorization: {error}"),
        ));
    }
    let state = state.ok_or_else(|| Error::bad_request("Missing `state` parameter"))?;
    pending.check(&state, config.state_secret())?;
    let code = code.ok_or_else(|| Error::bad_request("Missing `code` parameter"))?;

    let app = AppCredentials::load(&apps, config.asana_app_id()).await?;
    let tokens = AsanaClient::new(config, &app, http)
        .exchange_code(&code, &pending.redirect_uri)
        .await?;
    let user = tokens.user.clone().ok_or_else(|| {
        Error::Status(
            Status::BadGateway,
            "Asana did not say which user authorized us".to_string(),
        )
    })?;
    let credentials = UserCredentials::store(&users, &user.gid, &tokens, Utc::now()).await?;
    info!("Stored Asana credentials for user {}", user.gid);

    cookies.add_private(
        Cookie::build(USER_COOKIE, user.gid.clone())
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish(),
    );
    Ok(Json(SignedIn::new(&credentials, user.name)))
}

#[post("/oauth/refresh")]
async fn refresh(
    session: AsanaSession,
    config: &State<Config>,
    http: &State<HttpClient>,
    apps: Coll<AppCredentials>,
    users: Coll<UserCredentials>,
) -> Result<Json<SignedIn>> {
    let credentials =
        fresh_credentials(config, http, &apps, &users, &session.user_id, true).await?;
    Ok(Json(SignedIn::new(&credentials, None)))
}

#[delete("/oauth/session")]
fn sign_out(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::named(USER_COOKIE));
}

#[post("/users", data = "<new_user>", format = "json")]
async fn create_user(
    auth: BasicAuth,
    new_user: Json<NewUser>,
    config: &State<Config>,
    users: Coll<BasicAuthUser>,
) -> Result<()> {
    let user = BasicAuthUser::new(&new_user.username, &new_user.password, config.password_pepper())?;
    BasicAuthUser::create(&users, &user).await?;
    info!("{} added basic auth user {}", auth.username, user.username);
    Ok(())
}
